//! Persistence and collaborator seams.
//!
//! The engine talks to everything stateful through these traits so that
//! processing logic stays testable without Postgres. `PgStore` is the
//! production implementation; tests run against an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineResult;
use signet_shared::{
    ActionOutcome, DeploymentHistoryRecord, DisclaimerRule, EventType, LifecycleEvent,
    NotificationEntry, Organization, OrgUser, ProviderConnection, RunStatus, SignatureAssignment,
    SignatureTemplate, Workflow, WorkflowRun,
};

pub mod postgres;

pub use postgres::{PgStore, PoolConfig, create_pool, migrate};

/// Durable state owned by the engine: events, runs, assignments, deployment
/// history, notifications, provider connections, plus the user/org reads the
/// handlers need.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn insert_event(&self, event: &LifecycleEvent) -> EngineResult<()>;
    async fn get_event(&self, id: Uuid) -> EngineResult<Option<LifecycleEvent>>;
    /// Flips `processed` false -> true. A no-op for already-processed rows,
    /// so the transition happens at most once per event.
    async fn mark_event_processed(
        &self,
        id: Uuid,
        matched_workflow_id: Option<Uuid>,
    ) -> EngineResult<()>;

    async fn insert_run(&self, run: &WorkflowRun) -> EngineResult<()>;
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        results: &[ActionOutcome],
    ) -> EngineResult<()>;

    async fn get_user(&self, id: Uuid) -> EngineResult<Option<OrgUser>>;
    async fn get_organization(&self, id: Uuid) -> EngineResult<Option<Organization>>;
    async fn org_admins(&self, organization_id: Uuid) -> EngineResult<Vec<OrgUser>>;
    async fn deactivate_user(&self, user_id: Uuid) -> EngineResult<()>;

    async fn upsert_assignment(&self, assignment: &SignatureAssignment) -> EngineResult<()>;
    async fn highest_assignment(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> EngineResult<Option<SignatureAssignment>>;
    async fn delete_assignments(&self, user_id: Uuid, organization_id: Uuid) -> EngineResult<u64>;

    async fn get_template(&self, id: Uuid) -> EngineResult<Option<SignatureTemplate>>;
    async fn insert_deployment_record(&self, record: &DeploymentHistoryRecord) -> EngineResult<()>;
    async fn record_notification(&self, entry: &NotificationEntry) -> EngineResult<()>;

    async fn get_connection(
        &self,
        organization_id: Uuid,
        provider: &str,
    ) -> EngineResult<Option<ProviderConnection>>;
    /// Persists refreshed tokens. Scoped to one (organization, provider)
    /// row; never touches other organizations.
    async fn save_tokens(
        &self,
        organization_id: Uuid,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<()>;
}

/// Read-only view over externally-authored workflows.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Active workflows for the organization and event type, priority
    /// ascending.
    async fn active_workflows(
        &self,
        organization_id: Uuid,
        event_type: EventType,
    ) -> EngineResult<Vec<Workflow>>;

    /// A parent organization's active workflows flagged to cascade to its
    /// clients, priority ascending.
    async fn cascaded_workflows(
        &self,
        parent_organization_id: Uuid,
        event_type: EventType,
    ) -> EngineResult<Vec<Workflow>>;
}

/// Read-only view over externally-authored disclaimer rules and their
/// referenced templates.
#[async_trait]
pub trait DisclaimerRepository: Send + Sync {
    async fn active_rules(&self, organization_id: Uuid) -> EngineResult<Vec<DisclaimerRule>>;
    async fn cascaded_rules(&self, parent_organization_id: Uuid)
    -> EngineResult<Vec<DisclaimerRule>>;
    async fn template_html(&self, template_id: Uuid) -> EngineResult<Option<String>>;
}

/// Boolean feature gate against the external billing/plan system.
#[async_trait]
pub trait FeatureGate: Send + Sync {
    async fn is_entitled(&self, organization_id: Uuid, feature: &str) -> EngineResult<bool>;
}

/// The external signature renderer: a pure function from a template's block
/// definition plus user/org context to an HTML string. The engine never
/// inspects block internals.
pub trait SignatureRenderer: Send + Sync {
    fn render(
        &self,
        blocks: &serde_json::Value,
        user: &OrgUser,
        organization: &Organization,
    ) -> EngineResult<String>;
}
