//! Per-action handlers and the dispatch over the closed `ActionType` set.
//!
//! A handler either completes or returns an error; dispatch converts both
//! into an `ActionOutcome` so one broken action never takes down its
//! siblings. Adding an action type means adding a variant and an arm here,
//! never touching the runner.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::deployment::DeploymentPipeline;
use crate::error::{EngineError, EngineResult};
use crate::store::{FeatureGate, LifecycleStore};
use crate::webhook::WebhookExecutor;
use signet_shared::{
    ActionOutcome, ActionType, EventSource, EventType, LifecycleEvent, NotificationEntry, OrgUser,
    SignatureAssignment, WorkflowAction,
};

/// Feature key the webhook action is gated behind.
pub const WEBHOOKS_FEATURE: &str = "webhooks";

/// Everything a handler may read about the event being processed. Built once
/// per Process call; handlers never re-read the event row.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub event_id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: EventType,
    pub event_source: EventSource,
    pub event_data: serde_json::Value,
    pub user: Option<OrgUser>,
}

impl ActionContext {
    pub fn from_event(event: &LifecycleEvent, user: Option<OrgUser>) -> Self {
        Self {
            event_id: event.id,
            organization_id: event.organization_id,
            user_id: event.user_id,
            event_type: event.event_type,
            event_source: event.source,
            event_data: event.data.clone(),
            user,
        }
    }

    fn required_user(&self) -> EngineResult<&OrgUser> {
        self.user
            .as_ref()
            .ok_or_else(|| EngineError::Config("event has no associated user".into()))
    }
}

pub struct ActionExecutor {
    store: Arc<dyn LifecycleStore>,
    deployment: DeploymentPipeline,
    webhook: WebhookExecutor,
    gate: Arc<dyn FeatureGate>,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        deployment: DeploymentPipeline,
        webhook: WebhookExecutor,
        gate: Arc<dyn FeatureGate>,
    ) -> Self {
        Self {
            store,
            deployment,
            webhook,
            gate,
        }
    }

    /// Run one action. Errors are captured verbatim into the outcome and
    /// never propagate.
    pub async fn execute(&self, action: &WorkflowAction, context: &ActionContext) -> ActionOutcome {
        let result = self.dispatch(action, context).await;
        match result {
            Ok(()) => ActionOutcome::completed(action.action_type),
            Err(e) => {
                warn!(
                    event_id = %context.event_id,
                    action = action.action_type.as_str(),
                    "Action failed: {}",
                    e
                );
                ActionOutcome::failed(action.action_type, e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        action: &WorkflowAction,
        context: &ActionContext,
    ) -> EngineResult<()> {
        match action.action_type {
            ActionType::AssignTemplate => self.assign_template(context, &action.config).await,
            ActionType::DeploySignature => self.deployment.deploy_current(context).await,
            ActionType::SetDepartedSignature => {
                let message = action.config["message"].as_str();
                self.deployment.deploy_departed(context, message).await
            }
            ActionType::SendNotification => {
                self.send_notification(context, &action.config, "notification")
                    .await
            }
            ActionType::SendWelcomeEmail => {
                self.send_notification(context, &action.config, "welcome_email")
                    .await
            }
            ActionType::NotifyAdmin => self.notify_admin(context, &action.config).await,
            ActionType::ArchiveData => self.archive_data(context).await,
            ActionType::DeactivateUser => self.deactivate_user(context).await,
            ActionType::Webhook => self.call_webhook(context, &action.config).await,
            ActionType::Wait => {
                // Time-delayed continuation belongs to an external scheduler.
                info!(event_id = %context.event_id, "Wait action is a no-op in synchronous processing");
                Ok(())
            }
            ActionType::Unknown => Err(EngineError::UnsupportedAction(
                action
                    .unrecognized_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            )),
        }
    }

    /// Resolve a template through the department mapping, falling back to the
    /// fixed id. No resolvable target is a quiet no-op.
    async fn assign_template(
        &self,
        context: &ActionContext,
        config: &serde_json::Value,
    ) -> EngineResult<()> {
        let user = context.required_user()?;

        let mapped = user.department.as_deref().and_then(|dept| {
            config["department_mapping"][dept]
                .as_str()
                .and_then(|raw| Uuid::parse_str(raw).ok())
        });
        let fallback = config["template_id"]
            .as_str()
            .and_then(|raw| Uuid::parse_str(raw).ok());

        let Some(template_id) = mapped.or(fallback) else {
            info!(
                event_id = %context.event_id,
                "assign_template resolved no template; skipping"
            );
            return Ok(());
        };

        let priority = config["priority"].as_i64().unwrap_or(0) as i32;
        self.store
            .upsert_assignment(&SignatureAssignment {
                user_id: user.id,
                organization_id: context.organization_id,
                template_id,
                priority,
            })
            .await?;

        info!(user_id = %user.id, template_id = %template_id, "Signature template assigned");
        Ok(())
    }

    /// Durably records the notification intent; the mail transport hangs off
    /// this entry out of process.
    async fn send_notification(
        &self,
        context: &ActionContext,
        config: &serde_json::Value,
        kind: &str,
    ) -> EngineResult<()> {
        let subject = config["subject"].as_str().unwrap_or("Notification");
        let body = config["body"].as_str().unwrap_or("");

        match config["recipient_type"].as_str().unwrap_or("user") {
            "admins" => {
                for admin in self.store.org_admins(context.organization_id).await? {
                    self.store
                        .record_notification(&NotificationEntry::new(
                            context.organization_id,
                            Some(admin.id),
                            &admin.email,
                            subject,
                            body,
                            kind,
                        ))
                        .await?;
                }
                Ok(())
            }
            _ => {
                let user = context.required_user()?;
                self.store
                    .record_notification(&NotificationEntry::new(
                        context.organization_id,
                        Some(user.id),
                        &user.email,
                        subject,
                        body,
                        kind,
                    ))
                    .await
            }
        }
    }

    /// One entry per admin user of the organization.
    async fn notify_admin(
        &self,
        context: &ActionContext,
        config: &serde_json::Value,
    ) -> EngineResult<()> {
        let subject = config["subject"].as_str().unwrap_or("Lifecycle event");
        let body = match config["body"].as_str() {
            Some(body) => body.to_string(),
            None => format!(
                "Lifecycle event '{}' occurred for {}",
                context.event_type.as_str(),
                context
                    .user
                    .as_ref()
                    .map(|u| u.email.clone())
                    .unwrap_or_else(|| "an unknown user".to_string()),
            ),
        };

        let admins = self.store.org_admins(context.organization_id).await?;
        if admins.is_empty() {
            warn!(
                organization_id = %context.organization_id,
                "notify_admin found no admin users"
            );
        }
        for admin in admins {
            self.store
                .record_notification(&NotificationEntry::new(
                    context.organization_id,
                    Some(admin.id),
                    &admin.email,
                    subject,
                    &body,
                    "admin_alert",
                ))
                .await?;
        }
        Ok(())
    }

    async fn archive_data(&self, context: &ActionContext) -> EngineResult<()> {
        let user = context.required_user()?;
        let removed = self
            .store
            .delete_assignments(user.id, context.organization_id)
            .await?;
        info!(user_id = %user.id, removed, "Signature assignments archived");
        Ok(())
    }

    async fn deactivate_user(&self, context: &ActionContext) -> EngineResult<()> {
        let user = context.required_user()?;
        self.store.deactivate_user(user.id).await?;
        info!(user_id = %user.id, "User deactivated");
        Ok(())
    }

    async fn call_webhook(
        &self,
        context: &ActionContext,
        config: &serde_json::Value,
    ) -> EngineResult<()> {
        if !self
            .gate
            .is_entitled(context.organization_id, WEBHOOKS_FEATURE)
            .await?
        {
            return Err(EngineError::Config(
                "organization plan does not include webhooks".into(),
            ));
        }
        self.webhook.execute(context, config).await
    }
}
