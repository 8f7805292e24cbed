//! Engine error taxonomy.
//!
//! Configuration and connectivity errors are fatal to a single action and
//! surface in that run's `action_results`; persistence errors from the event
//! store or matcher abort the whole process call.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A write or read against the engine's own tables failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// An action type the executor has no handler for. This is a
    /// configuration bug in the authored workflow, not a runtime condition.
    #[error("unsupported action type: {0}")]
    UnsupportedAction(String),

    /// Required handler config is missing or malformed.
    #[error("invalid action config: {0}")]
    Config(String),

    /// The provider refused to refresh an expiring token. Intentionally
    /// loud: a stale, unrefreshable connection cannot deploy anything.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// The external signature renderer rejected its input.
    #[error("render failed: {0}")]
    Render(String),

    /// A mail-provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Webhook URL rejected by the egress guard before any network call.
    #[error("webhook URL rejected: {0}")]
    WebhookBlocked(String),

    /// Webhook transport error or non-2xx response.
    #[error("webhook request failed: {0}")]
    WebhookFailed(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("serialization: {}", err))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
