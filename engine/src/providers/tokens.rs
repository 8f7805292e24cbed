//! OAuth token lifecycle: proactive refresh of expiring per-organization
//! provider credentials, persisted before a client is handed out.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::{GOOGLE_WORKSPACE, ProviderAuth};
use crate::store::LifecycleStore;
use signet_shared::{AuthType, ProviderConnection};

/// Result of one refresh exchange. `refresh_token` is present only when the
/// provider rotated it.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, connection: &ProviderConnection) -> EngineResult<TokenSet>;
}

/// Refreshes against the provider's OAuth token endpoint.
#[derive(Debug)]
pub struct OauthTokenRefresher {
    client: BasicClient,
}

impl OauthTokenRefresher {
    pub fn new(config: &ProviderConfig) -> EngineResult<Self> {
        if !config.is_configured() {
            return Err(EngineError::Config(
                "provider OAuth client credentials are not configured".into(),
            ));
        }

        let auth_url = AuthUrl::new(config.oauth_auth_url.clone())
            .map_err(|e| EngineError::Config(format!("invalid OAuth auth URL: {}", e)))?;
        let token_url = TokenUrl::new(config.oauth_token_url.clone())
            .map_err(|e| EngineError::Config(format!("invalid OAuth token URL: {}", e)))?;

        Ok(Self {
            client: BasicClient::new(
                ClientId::new(config.oauth_client_id.clone()),
                Some(ClientSecret::new(config.oauth_client_secret.clone())),
                auth_url,
                Some(token_url),
            ),
        })
    }
}

#[async_trait]
impl TokenRefresher for OauthTokenRefresher {
    async fn refresh(&self, connection: &ProviderConnection) -> EngineResult<TokenSet> {
        let refresh_token = connection
            .refresh_token
            .as_ref()
            .ok_or_else(|| EngineError::TokenRefresh("connection has no refresh token".into()))?;

        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| EngineError::TokenRefresh(e.to_string()))?;

        let expires_in = response
            .expires_in()
            .map(|d| Duration::from_std(d).unwrap_or_else(|_| Duration::seconds(3600)))
            .unwrap_or_else(|| Duration::seconds(3600));

        Ok(TokenSet {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_at: Utc::now() + expires_in,
        })
    }
}

/// Owns every write to connection token fields. Hands out a discriminated
/// auth value so the deployment pipeline can branch on data: OAuth bearer,
/// delegated impersonation, or no connection at all.
pub struct TokenLifecycleManager {
    store: Arc<dyn LifecycleStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_margin: Duration,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        refresher: Arc<dyn TokenRefresher>,
        refresh_margin_secs: i64,
    ) -> Self {
        Self {
            store,
            refresher,
            refresh_margin: Duration::seconds(refresh_margin_secs),
        }
    }

    /// Resolve authenticated access for the organization's provider
    /// connection. A token missing or expiring within the refresh margin is
    /// refreshed and persisted before anything is returned; a failed refresh
    /// is a hard error because a stale connection cannot deploy.
    pub async fn resolve_client(&self, organization_id: Uuid) -> EngineResult<ProviderAuth> {
        let connection = match self
            .store
            .get_connection(organization_id, GOOGLE_WORKSPACE)
            .await?
        {
            Some(conn) if conn.is_active => conn,
            _ => return Ok(ProviderAuth::Unconnected),
        };

        if connection.auth_type == AuthType::Delegated {
            let admin_email = connection.delegated_admin_email.clone().ok_or_else(|| {
                EngineError::Config("delegated connection has no admin email".into())
            })?;
            return Ok(ProviderAuth::Delegated { admin_email });
        }

        if let (Some(token), Some(expires_at)) =
            (&connection.access_token, connection.token_expires_at)
        {
            if expires_at - Utc::now() >= self.refresh_margin {
                return Ok(ProviderAuth::Oauth {
                    access_token: token.clone(),
                });
            }
        }

        let tokens = self.refresher.refresh(&connection).await?;
        self.store
            .save_tokens(
                organization_id,
                GOOGLE_WORKSPACE,
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                tokens.expires_at,
            )
            .await?;

        info!(
            organization_id = %organization_id,
            expires_at = %tokens.expires_at,
            "Provider access token refreshed"
        );

        Ok(ProviderAuth::Oauth {
            access_token: tokens.access_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{CountingRefresher, MemoryStore, OrgFixture, connection};
    use signet_shared::AuthType;

    fn manager(store: Arc<MemoryStore>, refresher: Arc<CountingRefresher>) -> TokenLifecycleManager {
        TokenLifecycleManager::new(store, refresher, 300)
    }

    #[test]
    fn refresher_refuses_missing_client_credentials() {
        let config = ProviderConfig {
            api_base_url: "https://api.example.com".to_string(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_auth_url: "https://auth.example.com/auth".to_string(),
            oauth_token_url: "https://auth.example.com/token".to_string(),
        };

        let err = OauthTokenRefresher::new(&config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn token_expiring_in_four_minutes_is_refreshed() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        store.add_connection(connection(org.id, AuthType::Oauth, |c| {
            c.access_token = Some("stale".to_string());
            c.token_expires_at = Some(Utc::now() + Duration::minutes(4));
        }));

        let refresher = Arc::new(CountingRefresher::returning("fresh"));
        let auth = manager(store.clone(), refresher.clone())
            .resolve_client(org.id)
            .await
            .unwrap();

        assert_eq!(refresher.calls(), 1);
        match auth {
            ProviderAuth::Oauth { access_token } => assert_eq!(access_token, "fresh"),
            other => panic!("expected oauth auth, got {:?}", other),
        }

        // New tokens are persisted before the client is returned.
        let saved = store.connection(org.id).unwrap();
        assert_eq!(saved.access_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn token_with_ten_minutes_left_is_not_refreshed() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        store.add_connection(connection(org.id, AuthType::Oauth, |c| {
            c.access_token = Some("current".to_string());
            c.token_expires_at = Some(Utc::now() + Duration::minutes(10));
        }));

        let refresher = Arc::new(CountingRefresher::returning("unused"));
        let auth = manager(store.clone(), refresher.clone())
            .resolve_client(org.id)
            .await
            .unwrap();

        assert_eq!(refresher.calls(), 0);
        match auth {
            ProviderAuth::Oauth { access_token } => assert_eq!(access_token, "current"),
            other => panic!("expected oauth auth, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_token_forces_a_refresh() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        store.add_connection(connection(org.id, AuthType::Oauth, |c| {
            c.access_token = None;
        }));

        let refresher = Arc::new(CountingRefresher::returning("first"));
        manager(store.clone(), refresher.clone())
            .resolve_client(org.id)
            .await
            .unwrap();
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn delegated_connection_returns_impersonation_data() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        store.add_connection(connection(org.id, AuthType::Delegated, |c| {
            c.delegated_admin_email = Some("admin@example.com".to_string());
        }));

        let refresher = Arc::new(CountingRefresher::returning("unused"));
        let auth = manager(store.clone(), refresher.clone())
            .resolve_client(org.id)
            .await
            .unwrap();

        assert_eq!(refresher.calls(), 0);
        match auth {
            ProviderAuth::Delegated { admin_email } => {
                assert_eq!(admin_email, "admin@example.com")
            }
            other => panic!("expected delegated auth, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn absent_or_inactive_connection_is_unconnected() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        let refresher = Arc::new(CountingRefresher::returning("unused"));

        let auth = manager(store.clone(), refresher.clone())
            .resolve_client(org.id)
            .await
            .unwrap();
        assert!(matches!(auth, ProviderAuth::Unconnected));

        store.add_connection(connection(org.id, AuthType::Oauth, |c| {
            c.is_active = false;
        }));
        let auth = manager(store.clone(), refresher)
            .resolve_client(org.id)
            .await
            .unwrap();
        assert!(matches!(auth, ProviderAuth::Unconnected));
    }

    #[tokio::test]
    async fn failed_refresh_is_a_hard_error() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        store.add_connection(connection(org.id, AuthType::Oauth, |c| {
            c.access_token = None;
        }));

        let refresher = Arc::new(CountingRefresher::failing("revoked"));
        let err = manager(store, refresher)
            .resolve_client(org.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TokenRefresh(_)));
    }
}
