//! Signature deployment orchestration: assignment -> template -> render ->
//! disclaimers -> provider push, with the dual OAuth/impersonation path.
//!
//! Each stage short-circuits on "nothing to do" rather than erroring. A
//! deployment that reaches the provider always leaves one history record and
//! one audit entry, whatever the outcome.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::disclaimers::DisclaimerResolver;
use crate::error::{EngineError, EngineResult};
use crate::executor::ActionContext;
use crate::providers::tokens::TokenLifecycleManager;
use crate::providers::{MailProviderApi, ProviderAccess, ProviderAuth};
use crate::store::{LifecycleStore, SignatureRenderer};
use signet_shared::{
    DeploymentHistoryRecord, DeploymentStatus, NotificationEntry, Organization, OrgUser,
};

pub struct DeploymentPipeline {
    store: Arc<dyn LifecycleStore>,
    disclaimers: DisclaimerResolver,
    tokens: TokenLifecycleManager,
    api: Arc<dyn MailProviderApi>,
    renderer: Arc<dyn SignatureRenderer>,
}

impl DeploymentPipeline {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        disclaimers: DisclaimerResolver,
        tokens: TokenLifecycleManager,
        api: Arc<dyn MailProviderApi>,
        renderer: Arc<dyn SignatureRenderer>,
    ) -> Self {
        Self {
            store,
            disclaimers,
            tokens,
            api,
            renderer,
        }
    }

    /// Deploy the user's effective signature: highest-priority assignment,
    /// rendered template, stacked disclaimers.
    pub async fn deploy_current(&self, context: &ActionContext) -> EngineResult<()> {
        let user = required_user(context)?;

        let Some(assignment) = self
            .store
            .highest_assignment(user.id, context.organization_id)
            .await?
        else {
            info!(user_id = %user.id, "No signature assignment; nothing to deploy");
            return Ok(());
        };

        let Some(template) = self.store.get_template(assignment.template_id).await? else {
            warn!(
                template_id = %assignment.template_id,
                "Assigned template no longer exists; skipping deployment"
            );
            return Ok(());
        };

        let organization = self.organization(context.organization_id).await?;
        let html = self.renderer.render(&template.blocks, user, &organization)?;
        let html = self.with_disclaimers(html, user, &organization).await;

        self.push(context, user, Some(template.id), &html).await
    }

    /// Deploy a minimal "this person has left" fragment in place of a real
    /// signature, for offboarding workflows.
    pub async fn deploy_departed(
        &self,
        context: &ActionContext,
        custom_message: Option<&str>,
    ) -> EngineResult<()> {
        let user = required_user(context)?;
        let organization = self.organization(context.organization_id).await?;

        let message = match custom_message {
            Some(text) => text.to_string(),
            None => format!(
                "{} is no longer with {}. Please direct inquiries to {}.",
                user.display_name(),
                organization.name,
                organization
                    .domain
                    .as_deref()
                    .map(|d| format!("info@{}", d))
                    .unwrap_or_else(|| "the main office".to_string()),
            ),
        };

        let html = format!("<div class=\"departed-notice\"><p>{}</p></div>", message);
        let html = self.with_disclaimers(html, user, &organization).await;

        self.push(context, user, None, &html).await
    }

    /// Disclaimers are best-effort: a resolution failure is logged and the
    /// undecorated signature deploys anyway.
    async fn with_disclaimers(
        &self,
        html: String,
        user: &OrgUser,
        organization: &Organization,
    ) -> String {
        match self.disclaimers.resolve(user, organization).await {
            Ok(extra) if !extra.is_empty() => format!("{}{}", html, extra),
            Ok(_) => html,
            Err(e) => {
                warn!(user_id = %user.id, "Disclaimer resolution failed: {}", e);
                html
            }
        }
    }

    /// Resolve provider access and push. An unconnected organization exits
    /// silently; once a deployment is attempted, the outcome is recorded but
    /// never thrown, so sibling actions in the same workflow still run.
    async fn push(
        &self,
        context: &ActionContext,
        user: &OrgUser,
        template_id: Option<Uuid>,
        html: &str,
    ) -> EngineResult<()> {
        let result = match self.tokens.resolve_client(context.organization_id).await {
            Ok(ProviderAuth::Unconnected) => {
                info!(
                    organization_id = %context.organization_id,
                    "No provider connection; skipping deployment"
                );
                return Ok(());
            }
            Ok(ProviderAuth::Oauth { access_token }) => {
                self.api
                    .set_signature(&ProviderAccess::Bearer(access_token), &user.email, html)
                    .await
            }
            Ok(ProviderAuth::Delegated { admin_email }) => {
                self.api
                    .set_signature(
                        &ProviderAccess::Impersonated { admin_email },
                        &user.email,
                        html,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        let (status, error) = match &result {
            Ok(()) => (DeploymentStatus::Completed, None),
            Err(e) => {
                warn!(user_id = %user.id, "Signature deployment failed: {}", e);
                (DeploymentStatus::Failed, Some(e.to_string()))
            }
        };

        self.store
            .insert_deployment_record(&DeploymentHistoryRecord {
                id: Uuid::new_v4(),
                organization_id: context.organization_id,
                user_id: user.id,
                template_id,
                status,
                error: error.clone(),
                deployed_at: Utc::now(),
            })
            .await?;

        let (subject, body) = match status {
            DeploymentStatus::Completed => (
                "Signature deployed".to_string(),
                format!("Signature deployed for {}", user.email),
            ),
            DeploymentStatus::Failed => (
                "Signature deployment failed".to_string(),
                format!(
                    "Signature deployment for {} failed: {}",
                    user.email,
                    error.unwrap_or_default()
                ),
            ),
        };
        self.store
            .record_notification(&NotificationEntry::new(
                context.organization_id,
                Some(user.id),
                &user.email,
                &subject,
                &body,
                "deployment",
            ))
            .await?;

        Ok(())
    }

    async fn organization(&self, id: Uuid) -> EngineResult<Organization> {
        self.store
            .get_organization(id)
            .await?
            .ok_or_else(|| EngineError::Config(format!("organization {} not found", id)))
    }
}

fn required_user(context: &ActionContext) -> EngineResult<&OrgUser> {
    context
        .user
        .as_ref()
        .ok_or_else(|| EngineError::Config("event has no associated user".into()))
}
