//! Mail/directory provider transport.
//!
//! The engine consumes the provider through one opaque API trait plus an
//! access discriminant: per-organization OAuth bearer tokens, or a
//! privileged service account impersonating users on the delegated path.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::{EngineError, EngineResult};

pub mod tokens;

/// Provider identifier used for connection rows.
pub const GOOGLE_WORKSPACE: &str = "google_workspace";

/// How an organization's provider calls authenticate. Resolved from the
/// connection row by the token lifecycle manager; callers branch on data
/// instead of catching a sentinel error.
#[derive(Debug, Clone)]
pub enum ProviderAuth {
    Oauth { access_token: String },
    Delegated { admin_email: String },
    Unconnected,
}

/// Credentials attached to one provider call.
#[derive(Debug, Clone)]
pub enum ProviderAccess {
    Bearer(String),
    Impersonated { admin_email: String },
}

#[async_trait]
pub trait MailProviderApi: Send + Sync {
    async fn set_signature(
        &self,
        access: &ProviderAccess,
        email: &str,
        html: &str,
    ) -> EngineResult<()>;

    async fn list_users(&self, access: &ProviderAccess, domain: &str)
    -> EngineResult<Vec<String>>;
}

/// HTTP implementation of the provider API.
pub struct HttpProviderApi {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    #[serde(rename = "primaryEmail")]
    primary_email: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryPage {
    #[serde(default)]
    users: Vec<DirectoryUser>,
}

impl HttpProviderApi {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        access: &ProviderAccess,
    ) -> reqwest::RequestBuilder {
        match access {
            ProviderAccess::Bearer(token) => request.bearer_auth(token),
            ProviderAccess::Impersonated { admin_email } => {
                request.header("X-Admin-Subject", admin_email)
            }
        }
    }
}

#[async_trait]
impl MailProviderApi for HttpProviderApi {
    async fn set_signature(
        &self,
        access: &ProviderAccess,
        email: &str,
        html: &str,
    ) -> EngineResult<()> {
        let url = format!("{}/users/{}/signature", self.base_url, email);
        let request = self
            .http
            .put(&url)
            .json(&serde_json::json!({ "signature": html }));

        let response = self
            .authorize(request, access)
            .send()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "set_signature for {} returned {}",
                email,
                response.status()
            )));
        }

        Ok(())
    }

    async fn list_users(
        &self,
        access: &ProviderAccess,
        domain: &str,
    ) -> EngineResult<Vec<String>> {
        let url = format!("{}/users", self.base_url);
        let request = self.http.get(&url).query(&[("domain", domain)]);

        let response = self
            .authorize(request, access)
            .send()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "list_users for {} returned {}",
                domain,
                response.status()
            )));
        }

        let page: DirectoryPage = response
            .json()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        Ok(page.users.into_iter().map(|u| u.primary_email).collect())
    }
}
