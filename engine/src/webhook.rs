//! Hardened HTTP egress for the webhook action.
//!
//! Every URL passes the SSRF guard before any network call: http(s) schemes
//! only, and no loopback, private-range, link-local, or unspecified
//! destinations. The request itself runs under a hard timeout.

use chrono::Utc;
use reqwest::Method;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tracing::info;
use url::{Host, Url};

use crate::error::{EngineError, EngineResult};
use crate::executor::ActionContext;

pub struct WebhookExecutor {
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Deliver the event envelope to the configured URL. A blocked URL, a
    /// transport error, or a non-2xx response all fail the action.
    pub async fn execute(
        &self,
        context: &ActionContext,
        config: &serde_json::Value,
    ) -> EngineResult<()> {
        let url = config["url"]
            .as_str()
            .ok_or_else(|| EngineError::Config("webhook config has no url".into()))?;
        validate_egress_url(url)?;

        let method = parse_method(config["method"].as_str().unwrap_or("POST"))?;
        let payload = envelope(context);

        let mut request = self
            .http
            .request(method, url)
            .timeout(self.timeout)
            .json(&payload);

        if let Some(headers) = config["headers"].as_object() {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(name, v);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::WebhookFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::WebhookFailed(format!(
                "received status {}",
                status
            )));
        }

        info!(event_id = %context.event_id, url, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }
}

/// The fixed wire envelope: event facts and raw event data only, never
/// signature content or credentials.
pub fn envelope(context: &ActionContext) -> serde_json::Value {
    serde_json::json!({
        "eventType": context.event_type.as_str(),
        "eventSource": context.event_source.as_str(),
        "userId": context.user_id,
        "organizationId": context.organization_id,
        "eventData": context.event_data,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn parse_method(raw: &str) -> EngineResult<Method> {
    match raw.to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(EngineError::Config(format!(
            "unsupported webhook method: {}",
            other
        ))),
    }
}

/// Mandatory SSRF guard, applied before any network I/O.
pub fn validate_egress_url(raw: &str) -> EngineResult<()> {
    let url =
        Url::parse(raw).map_err(|e| EngineError::WebhookBlocked(format!("invalid URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(EngineError::WebhookBlocked(format!(
                "scheme '{}' is not allowed",
                other
            )));
        }
    }

    match url.host() {
        None => Err(EngineError::WebhookBlocked("URL has no host".into())),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                Err(EngineError::WebhookBlocked(
                    "localhost destinations are not allowed".into(),
                ))
            } else {
                Ok(())
            }
        }
        Some(Host::Ipv4(ip)) => {
            if ipv4_blocked(ip) {
                Err(EngineError::WebhookBlocked(format!(
                    "address {} is not routable for webhooks",
                    ip
                )))
            } else {
                Ok(())
            }
        }
        Some(Host::Ipv6(ip)) => {
            if ipv6_blocked(ip) {
                Err(EngineError::WebhookBlocked(format!(
                    "address {} is not routable for webhooks",
                    ip
                )))
            } else {
                Ok(())
            }
        }
    }
}

fn ipv4_blocked(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn ipv6_blocked(ip: Ipv6Addr) -> bool {
    // An IPv4-mapped literal answers to the IPv4 rules.
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return ipv4_blocked(mapped);
    }

    let head = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (head & 0xffc0) == 0xfe80 // link-local fe80::/10
        || (head & 0xfe00) == 0xfc00 // unique-local fc00::/7
}
