//! Webhook endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::DeliveryError;

/// Destination for serialized webhook events.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Makes one delivery attempt of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the attempt failed for any reason.
    async fn send(&self, payload: &str) -> Result<(), DeliveryError>;
}

/// POSTs payloads as `application/json` to a fixed URL.
#[derive(Clone)]
pub struct HttpWebhookSink {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhookSink {
    /// Creates a sink whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Endpoint receiving the payloads.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn send(&self, payload: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
