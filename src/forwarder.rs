//! Outbound call to the downstream analysis webhook.
//!
//! One POST per relayed request, no retries.  Non-success statuses and
//! unparseable bodies are distinct failures; upstream bodies are logged for
//! operators and never returned to the caller.

use std::time::Duration;

use serde_json::Value;

use crate::error::RelayError;

/// Anything that can turn submitted code into a raw analysis payload.  The
/// relay handler only talks to this trait, which keeps the HTTP transport
/// swappable in tests.
#[async_trait::async_trait]
pub trait Downstream: Send + Sync {
    /// Whether a destination is configured at all.
    fn is_configured(&self) -> bool;

    async fn forward(&self, code: &str) -> Result<Value, RelayError>;
}

pub struct WebhookForwarder {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookForwarder {
    /// Build a forwarder.  `timeout` of `None` keeps the transport default
    /// (no overall deadline).
    pub fn new(url: Option<String>, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            url,
            client: builder.build()?,
        })
    }
}

#[async_trait::async_trait]
impl Downstream for WebhookForwarder {
    fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn forward(&self, code: &str) -> Result<Value, RelayError> {
        let url = match self.url.as_deref() {
            Some(url) => url,
            None => {
                tracing::error!("webhook URL is not configured");
                return Err(RelayError::Config);
            }
        };

        tracing::debug!(url = %url, code_bytes = code.len(), "forwarding to webhook");
        let resp = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, "webhook network error");
                RelayError::Upstream { status: None }
            })?;

        let status = resp.status();
        tracing::debug!(status = status.as_u16(), "webhook responded");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "webhook returned error status");
            return Err(RelayError::Upstream {
                status: Some(status.as_u16()),
            });
        }

        let text = resp.text().await.map_err(|err| {
            tracing::error!(status = status.as_u16(), error = ?err, "webhook body read error");
            RelayError::Upstream {
                status: Some(status.as_u16()),
            }
        })?;
        tracing::trace!(body = %text, "raw webhook response");

        serde_json::from_str::<Value>(&text).map_err(|err| {
            tracing::error!(error = %err, "webhook response is not valid JSON");
            RelayError::Parse
        })
    }
}
