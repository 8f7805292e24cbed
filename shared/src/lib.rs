use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discrete facts about a user's organizational status that can trigger
/// lifecycle automation.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "lifecycle_event_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Joined,
    Left,
    Moved,
    Updated,
    InviteAccepted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Left => "left",
            Self::Moved => "moved",
            Self::Updated => "updated",
            Self::InviteAccepted => "invite_accepted",
        }
    }
}

/// Where a lifecycle event originated.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "lifecycle_event_source", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    GoogleSync,
    MicrosoftSync,
    HrSync,
    Invite,
    Manual,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleSync => "google_sync",
            Self::MicrosoftSync => "microsoft_sync",
            Self::HrSync => "hr_sync",
            Self::Invite => "invite",
            Self::Manual => "manual",
        }
    }
}

/// A durable, append-only record of one lifecycle event. Created once by
/// emit, flipped to `processed` exactly once, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: EventType,
    pub source: EventSource,
    pub data: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub matched_workflow_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        organization_id: Uuid,
        user_id: Option<Uuid>,
        event_type: EventType,
        source: EventSource,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            event_type,
            source,
            data,
            processed: false,
            processed_at: None,
            matched_workflow_id: None,
            created_at: Utc::now(),
        }
    }

    /// A person appeared in the organization's directory.
    pub fn joined(organization_id: Uuid, user_id: Uuid, source: EventSource) -> Self {
        Self::new(
            organization_id,
            Some(user_id),
            EventType::Joined,
            source,
            serde_json::json!({}),
        )
    }

    /// A person left the organization.
    pub fn left(organization_id: Uuid, user_id: Uuid, source: EventSource) -> Self {
        Self::new(
            organization_id,
            Some(user_id),
            EventType::Left,
            source,
            serde_json::json!({}),
        )
    }

    /// A person moved departments.
    pub fn moved(
        organization_id: Uuid,
        user_id: Uuid,
        old_department: &str,
        new_department: &str,
        source: EventSource,
    ) -> Self {
        Self::new(
            organization_id,
            Some(user_id),
            EventType::Moved,
            source,
            serde_json::json!({
                "old_department": old_department,
                "new_department": new_department,
            }),
        )
    }

    /// Profile fields changed without a department move.
    pub fn updated(organization_id: Uuid, user_id: Uuid, source: EventSource) -> Self {
        Self::new(
            organization_id,
            Some(user_id),
            EventType::Updated,
            source,
            serde_json::json!({}),
        )
    }

    /// A person accepted an invitation to the platform.
    pub fn invite_accepted(organization_id: Uuid, user_id: Uuid) -> Self {
        Self::new(
            organization_id,
            Some(user_id),
            EventType::InviteAccepted,
            EventSource::Invite,
            serde_json::json!({}),
        )
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// The closed set of actions a workflow can execute. Values arriving from
/// externally-authored configuration that we do not recognize land on
/// `Unknown` and fail at dispatch time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AssignTemplate,
    DeploySignature,
    SetDepartedSignature,
    SendNotification,
    SendWelcomeEmail,
    NotifyAdmin,
    ArchiveData,
    DeactivateUser,
    Webhook,
    Wait,
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssignTemplate => "assign_template",
            Self::DeploySignature => "deploy_signature",
            Self::SetDepartedSignature => "set_departed_signature",
            Self::SendNotification => "send_notification",
            Self::SendWelcomeEmail => "send_welcome_email",
            Self::NotifyAdmin => "notify_admin",
            Self::ArchiveData => "archive_data",
            Self::DeactivateUser => "deactivate_user",
            Self::Webhook => "webhook",
            Self::Wait => "wait",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "assign_template" => Self::AssignTemplate,
            "deploy_signature" => Self::DeploySignature,
            "set_departed_signature" => Self::SetDepartedSignature,
            "send_notification" => Self::SendNotification,
            "send_welcome_email" => Self::SendWelcomeEmail,
            "notify_admin" => Self::NotifyAdmin,
            "archive_data" => Self::ArchiveData,
            "deactivate_user" => Self::DeactivateUser,
            "webhook" => Self::Webhook,
            "wait" => Self::Wait,
            _ => Self::Unknown,
        }
    }
}

/// One step in a workflow. The config shape is handler-specific and
/// validated by the handler, not by the runner.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: serde_json::Value,
    /// The raw `type` string from authored config when it matched no known
    /// variant, kept so dispatch can report the misconfigured value verbatim.
    #[serde(skip)]
    pub unrecognized_type: Option<String>,
}

// Hand-rolled so an unrecognized `type` string survives deserialization
// instead of collapsing into an anonymous `Unknown`.
impl<'de> Deserialize<'de> for WorkflowAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "type")]
            type_name: String,
            #[serde(default)]
            config: serde_json::Value,
        }

        let wire = Wire::deserialize(deserializer)?;
        let action_type = ActionType::from_name(&wire.type_name);
        let unrecognized_type = match action_type {
            ActionType::Unknown => Some(wire.type_name),
            _ => None,
        };

        Ok(Self {
            action_type,
            config: wire.config,
            unrecognized_type,
        })
    }
}

impl WorkflowAction {
    pub fn new(action_type: ActionType, config: serde_json::Value) -> Self {
        Self {
            action_type,
            config,
            unrecognized_type: None,
        }
    }

    pub fn assign_template(template_id: Uuid) -> Self {
        Self::new(
            ActionType::AssignTemplate,
            serde_json::json!({ "template_id": template_id }),
        )
    }

    pub fn deploy_signature() -> Self {
        Self::new(ActionType::DeploySignature, serde_json::json!({}))
    }

    pub fn set_departed_signature(message: Option<&str>) -> Self {
        Self::new(
            ActionType::SetDepartedSignature,
            serde_json::json!({ "message": message }),
        )
    }

    pub fn notify_admin(subject: &str, body: &str) -> Self {
        Self::new(
            ActionType::NotifyAdmin,
            serde_json::json!({ "subject": subject, "body": body }),
        )
    }

    pub fn webhook(url: &str) -> Self {
        Self::new(ActionType::Webhook, serde_json::json!({ "url": url }))
    }
}

/// An externally-authored automation rule: an ordered list of actions gated
/// by an event type and optional filters. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub event_type: EventType,
    /// Ascending priority orders which workflow runs first. Action order
    /// within one workflow is array order, deliberately independent of this.
    pub priority: i32,
    pub department_filter: Option<Vec<String>>,
    pub source_filter: Option<Vec<String>>,
    pub is_active: bool,
    pub cascade_to_clients: bool,
    pub actions: Vec<WorkflowAction>,
    pub created_at: DateTime<Utc>,
}

/// Terminal disposition of one workflow run.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "run_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Failed,
}

/// Per-action outcome captured in a run's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn completed(action_type: ActionType) -> Self {
        Self {
            action_type,
            status: ActionStatus::Completed,
            error: None,
        }
    }

    pub fn failed(action_type: ActionType, error: impl Into<String>) -> Self {
        Self {
            action_type,
            status: ActionStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ActionStatus::Failed
    }
}

/// One execution attempt of one workflow against one event. Append-only;
/// the terminal status is set once and never revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub workflow_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: RunStatus,
    pub action_results: Vec<ActionOutcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn started(workflow: &Workflow, event: &LifecycleEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: event.organization_id,
            workflow_id: workflow.id,
            event_id: event.id,
            user_id: event.user_id,
            status: RunStatus::Running,
            action_results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// How an organization's mail-provider connection authenticates.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "provider_auth_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Oauth,
    Delegated,
}

/// One logical connection per (organization, provider). Token fields are
/// owned exclusively by the token lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub organization_id: Uuid,
    pub provider: String,
    pub auth_type: AuthType,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Admin account impersonated on the delegated/service-account path.
    pub delegated_admin_email: Option<String>,
    pub is_active: bool,
}

/// How a disclaimer rule condition interprets its value list.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "condition_mode", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    Include,
    Exclude,
}

/// Externally-authored disclaimer rule, evaluated per deployment. Every
/// matching active rule contributes its template HTML, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclaimerRule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub template_id: Uuid,
    pub priority: i32,
    pub department_condition: Option<ConditionMode>,
    pub departments: Vec<String>,
    pub region_condition: Option<ConditionMode>,
    pub regions: Vec<String>,
    pub recipient_condition: Option<ConditionMode>,
    pub recipient_domains: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub cascade_to_clients: bool,
}

/// At most one effective assignment per user; highest priority wins.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAssignment {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub template_id: Uuid,
    pub priority: i32,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "deployment_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Completed,
    Failed,
}

/// Append-only audit row written once per deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub template_id: Option<Uuid>,
    pub status: DeploymentStatus,
    pub error: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// MSP-style hierarchy: set when this organization is managed by a
    /// parent whose flagged workflows and rules cascade down.
    pub parent_organization_id: Option<Uuid>,
    pub domain: Option<String>,
    pub industry: Option<String>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgUser {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub region: Option<String>,
    pub title: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
}

impl OrgUser {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A signature template's block definition, opaque to the engine and handed
/// to the external renderer as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureTemplate {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub blocks: serde_json::Value,
    pub is_active: bool,
}

/// Durable record of a notification intent. The actual sending transport is
/// an external collaborator; the engine only guarantees the intent is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationEntry {
    pub fn new(
        organization_id: Uuid,
        user_id: Option<Uuid>,
        recipient: &str,
        subject: &str,
        body: &str,
        kind: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            kind: kind.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();

        let event = LifecycleEvent::moved(org, user, "Sales", "Marketing", EventSource::GoogleSync);
        assert_eq!(event.event_type, EventType::Moved);
        assert!(!event.processed);
        assert_eq!(event.data["new_department"], "Marketing");

        let event = LifecycleEvent::invite_accepted(org, user);
        assert_eq!(event.source, EventSource::Invite);
    }

    #[test]
    fn test_unknown_action_type_deserializes() {
        let action: WorkflowAction =
            serde_json::from_value(serde_json::json!({ "type": "launch_rocket", "config": {} }))
                .expect("unknown types must parse");
        assert_eq!(action.action_type, ActionType::Unknown);
        assert_eq!(action.unrecognized_type.as_deref(), Some("launch_rocket"));
    }

    #[test]
    fn test_known_action_type_keeps_no_raw_name() {
        let action: WorkflowAction =
            serde_json::from_value(serde_json::json!({ "type": "deploy_signature" })).unwrap();
        assert_eq!(action.action_type, ActionType::DeploySignature);
        assert_eq!(action.unrecognized_type, None);
        assert_eq!(action.config, serde_json::json!(null));
    }

    #[test]
    fn test_action_type_round_trip() {
        let json = serde_json::to_string(&ActionType::SetDepartedSignature).unwrap();
        assert_eq!(json, "\"set_departed_signature\"");
    }

    #[test]
    fn test_action_outcome() {
        let ok = ActionOutcome::completed(ActionType::DeploySignature);
        assert!(!ok.is_failed());

        let bad = ActionOutcome::failed(ActionType::Webhook, "connection refused");
        assert!(bad.is_failed());
        assert_eq!(bad.error.as_deref(), Some("connection refused"));
    }
}
