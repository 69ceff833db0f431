//! The HTTP boundary the coordinator posts webhooks through, behind a
//! trait so tests can substitute an in-memory double instead of standing
//! up a real listener (mirrors the teacher's `CredentialManager` seam).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{GatewayError, Result};

use super::webhook::{WebhookPayload, WebhookResponse};

#[async_trait]
pub trait DispatchTransport: Send + Sync {
    /// POST `payload` to `url`, waiting at most `timeout` per attempt. A
    /// `2xx` response with an empty or non-JSON body is treated as
    /// "accepted, no inline quote" rather than an error.
    async fn post(
        &self,
        url: &str,
        payload: &WebhookPayload,
        timeout: Duration,
    ) -> Result<Option<WebhookResponse>>;
}

/// Production transport backed by a shared [`reqwest::Client`].
pub struct HttpDispatchTransport {
    client: Client,
}

impl HttpDispatchTransport {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DispatchTransport for HttpDispatchTransport {
    async fn post(
        &self,
        url: &str,
        payload: &WebhookPayload,
        timeout: Duration,
    ) -> Result<Option<WebhookResponse>> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Dispatch(format!("webhook request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Dispatch(format!(
                "webhook returned status {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::Dispatch(format!("failed to read webhook body: {e}")))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice::<WebhookResponse>(&bytes) {
            Ok(body) => Ok(Some(body)),
            Err(_) => Ok(None),
        }
    }
}
