//! Postgres-backed store, runtime-checked queries throughout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::store::{DisclaimerRepository, LifecycleStore, WorkflowRepository};
use signet_shared::{
    ActionOutcome, AuthType, ConditionMode, DeploymentHistoryRecord, DisclaimerRule, EventSource,
    EventType, LifecycleEvent, NotificationEntry, Organization, OrgUser, ProviderConnection,
    RunStatus, SignatureAssignment, SignatureTemplate, Workflow, WorkflowAction, WorkflowRun,
};

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("DB_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                config.max_connections = n;
            }
        }

        if let Ok(min) = std::env::var("DB_MIN_CONNECTIONS") {
            if let Ok(n) = min.parse() {
                config.min_connections = n;
            }
        }

        if let Ok(timeout) = std::env::var("DB_ACQUIRE_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                config.acquire_timeout = Duration::from_secs(n);
            }
        }

        config
    }
}

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let config = PoolConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    tracing::info!(
        "Database pool created: max={}, min={}",
        config.max_connections,
        config.min_connections
    );

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_workflow_rows(
        rows: Vec<(
            Uuid,
            Uuid,
            String,
            EventType,
            i32,
            Option<Vec<String>>,
            Option<Vec<String>>,
            bool,
            bool,
            serde_json::Value,
            DateTime<Utc>,
        )>,
    ) -> Vec<Workflow> {
        rows.into_iter()
            .filter_map(|row| {
                let actions: Vec<WorkflowAction> = serde_json::from_value(row.9).ok()?;
                Some(Workflow {
                    id: row.0,
                    organization_id: row.1,
                    name: row.2,
                    event_type: row.3,
                    priority: row.4,
                    department_filter: row.5,
                    source_filter: row.6,
                    is_active: row.7,
                    cascade_to_clients: row.8,
                    actions,
                    created_at: row.10,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LifecycleStore for PgStore {
    async fn insert_event(&self, event: &LifecycleEvent) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lifecycle_events
            (id, organization_id, user_id, event_type, source, data, processed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, false, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.organization_id)
        .bind(event.user_id)
        .bind(event.event_type)
        .bind(event.source)
        .bind(&event.data)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> EngineResult<Option<LifecycleEvent>> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                Uuid,
                Option<Uuid>,
                EventType,
                EventSource,
                serde_json::Value,
                bool,
                Option<DateTime<Utc>>,
                Option<Uuid>,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT id, organization_id, user_id, event_type, source, data,
                   processed, processed_at, matched_workflow_id, created_at
            FROM lifecycle_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LifecycleEvent {
            id: r.0,
            organization_id: r.1,
            user_id: r.2,
            event_type: r.3,
            source: r.4,
            data: r.5,
            processed: r.6,
            processed_at: r.7,
            matched_workflow_id: r.8,
            created_at: r.9,
        }))
    }

    async fn mark_event_processed(
        &self,
        id: Uuid,
        matched_workflow_id: Option<Uuid>,
    ) -> EngineResult<()> {
        // The processed guard keeps the false -> true transition one-shot.
        sqlx::query(
            r#"
            UPDATE lifecycle_events
            SET processed = true, processed_at = NOW(), matched_workflow_id = $2
            WHERE id = $1 AND processed = false
            "#,
        )
        .bind(id)
        .bind(matched_workflow_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_run(&self, run: &WorkflowRun) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs
            (id, organization_id, workflow_id, event_id, user_id, status, action_results, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.id)
        .bind(run.organization_id)
        .bind(run.workflow_id)
        .bind(run.event_id)
        .bind(run.user_id)
        .bind(run.status)
        .bind(serde_json::to_value(&run.action_results)?)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        results: &[ActionOutcome],
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, action_results = $3, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status)
        .bind(serde_json::to_value(results)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> EngineResult<Option<OrgUser>> {
        let user = sqlx::query_as::<_, OrgUser>(
            r#"
            SELECT id, organization_id, email, first_name, last_name,
                   department, region, title, is_admin, is_active
            FROM org_users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_organization(&self, id: Uuid) -> EngineResult<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, parent_organization_id, domain, industry
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    async fn org_admins(&self, organization_id: Uuid) -> EngineResult<Vec<OrgUser>> {
        let admins = sqlx::query_as::<_, OrgUser>(
            r#"
            SELECT id, organization_id, email, first_name, last_name,
                   department, region, title, is_admin, is_active
            FROM org_users
            WHERE organization_id = $1 AND is_admin = true AND is_active = true
            ORDER BY email
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(admins)
    }

    async fn deactivate_user(&self, user_id: Uuid) -> EngineResult<()> {
        sqlx::query("UPDATE org_users SET is_active = false WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_assignment(&self, assignment: &SignatureAssignment) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO signature_assignments (user_id, organization_id, template_id, priority)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, organization_id)
            DO UPDATE SET template_id = EXCLUDED.template_id, priority = EXCLUDED.priority
            "#,
        )
        .bind(assignment.user_id)
        .bind(assignment.organization_id)
        .bind(assignment.template_id)
        .bind(assignment.priority)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn highest_assignment(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> EngineResult<Option<SignatureAssignment>> {
        let assignment = sqlx::query_as::<_, SignatureAssignment>(
            r#"
            SELECT user_id, organization_id, template_id, priority
            FROM signature_assignments
            WHERE user_id = $1 AND organization_id = $2
            ORDER BY priority DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    async fn delete_assignments(&self, user_id: Uuid, organization_id: Uuid) -> EngineResult<u64> {
        let result =
            sqlx::query("DELETE FROM signature_assignments WHERE user_id = $1 AND organization_id = $2")
                .bind(user_id)
                .bind(organization_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn get_template(&self, id: Uuid) -> EngineResult<Option<SignatureTemplate>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, serde_json::Value, bool)>(
            r#"
            SELECT id, organization_id, name, blocks, is_active
            FROM signature_templates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SignatureTemplate {
            id: r.0,
            organization_id: r.1,
            name: r.2,
            blocks: r.3,
            is_active: r.4,
        }))
    }

    async fn insert_deployment_record(&self, record: &DeploymentHistoryRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_history
            (id, organization_id, user_id, template_id, status, error, deployed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.organization_id)
        .bind(record.user_id)
        .bind(record.template_id)
        .bind(record.status)
        .bind(&record.error)
        .bind(record.deployed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_notification(&self, entry: &NotificationEntry) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_log
            (id, organization_id, user_id, recipient, subject, body, kind, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.organization_id)
        .bind(entry.user_id)
        .bind(&entry.recipient)
        .bind(&entry.subject)
        .bind(&entry.body)
        .bind(&entry.kind)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_connection(
        &self,
        organization_id: Uuid,
        provider: &str,
    ) -> EngineResult<Option<ProviderConnection>> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                String,
                AuthType,
                Option<String>,
                Option<String>,
                Option<DateTime<Utc>>,
                Option<String>,
                bool,
            ),
        >(
            r#"
            SELECT organization_id, provider, auth_type, access_token, refresh_token,
                   token_expires_at, delegated_admin_email, is_active
            FROM provider_connections
            WHERE organization_id = $1 AND provider = $2
            "#,
        )
        .bind(organization_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ProviderConnection {
            organization_id: r.0,
            provider: r.1,
            auth_type: r.2,
            access_token: r.3,
            refresh_token: r.4,
            token_expires_at: r.5,
            delegated_admin_email: r.6,
            is_active: r.7,
        }))
    }

    async fn save_tokens(
        &self,
        organization_id: Uuid,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        // COALESCE keeps the stored refresh token when the provider does not
        // rotate it.
        sqlx::query(
            r#"
            UPDATE provider_connections
            SET access_token = $3,
                refresh_token = COALESCE($4, refresh_token),
                token_expires_at = $5
            WHERE organization_id = $1 AND provider = $2
            "#,
        )
        .bind(organization_id)
        .bind(provider)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for PgStore {
    async fn active_workflows(
        &self,
        organization_id: Uuid,
        event_type: EventType,
    ) -> EngineResult<Vec<Workflow>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, organization_id, name, event_type, priority,
                   department_filter, source_filter, is_active, cascade_to_clients,
                   actions, created_at
            FROM workflows
            WHERE organization_id = $1 AND event_type = $2 AND is_active = true
            ORDER BY priority ASC
            "#,
        )
        .bind(organization_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_workflow_rows(rows))
    }

    async fn cascaded_workflows(
        &self,
        parent_organization_id: Uuid,
        event_type: EventType,
    ) -> EngineResult<Vec<Workflow>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, organization_id, name, event_type, priority,
                   department_filter, source_filter, is_active, cascade_to_clients,
                   actions, created_at
            FROM workflows
            WHERE organization_id = $1 AND event_type = $2
              AND is_active = true AND cascade_to_clients = true
            ORDER BY priority ASC
            "#,
        )
        .bind(parent_organization_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_workflow_rows(rows))
    }
}

#[async_trait]
impl DisclaimerRepository for PgStore {
    async fn active_rules(&self, organization_id: Uuid) -> EngineResult<Vec<DisclaimerRule>> {
        self.rules_where("organization_id = $1 AND is_active = true", organization_id)
            .await
    }

    async fn cascaded_rules(
        &self,
        parent_organization_id: Uuid,
    ) -> EngineResult<Vec<DisclaimerRule>> {
        self.rules_where(
            "organization_id = $1 AND is_active = true AND cascade_to_clients = true",
            parent_organization_id,
        )
        .await
    }

    async fn template_html(&self, template_id: Uuid) -> EngineResult<Option<String>> {
        let html = sqlx::query_scalar::<_, String>(
            "SELECT html FROM disclaimer_templates WHERE id = $1 AND is_active = true",
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(html)
    }
}

impl PgStore {
    async fn rules_where(
        &self,
        predicate: &str,
        organization_id: Uuid,
    ) -> EngineResult<Vec<DisclaimerRule>> {
        let query = format!(
            r#"
            SELECT id, organization_id, template_id, priority,
                   department_condition, departments, region_condition, regions,
                   recipient_condition, recipient_domains, start_date, end_date,
                   is_active, cascade_to_clients
            FROM disclaimer_rules
            WHERE {}
            ORDER BY priority ASC
            "#,
            predicate
        );

        let rows = sqlx::query_as::<
            _,
            (
                Uuid,
                Uuid,
                Uuid,
                i32,
                Option<ConditionMode>,
                Vec<String>,
                Option<ConditionMode>,
                Vec<String>,
                Option<ConditionMode>,
                Vec<String>,
                Option<DateTime<Utc>>,
                Option<DateTime<Utc>>,
                bool,
                bool,
            ),
        >(&query)
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DisclaimerRule {
                id: r.0,
                organization_id: r.1,
                template_id: r.2,
                priority: r.3,
                department_condition: r.4,
                departments: r.5,
                region_condition: r.6,
                regions: r.7,
                recipient_condition: r.8,
                recipient_domains: r.9,
                start_date: r.10,
                end_date: r.11,
                is_active: r.12,
                cascade_to_clients: r.13,
            })
            .collect())
    }
}
