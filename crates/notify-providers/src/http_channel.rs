//! Generic HTTP-webhook provider shared by SMS, WhatsApp, and Push — the
//! same `reqwest::Client` construction and status-to-outcome mapping shape
//! this codebase's outbound HTTP dispatch client uses, parameterized per
//! channel by base URL, auth header, and request field mapping.

use std::time::Duration;

use async_trait::async_trait;
use notify_common::{Channel, Metadata, ProviderError, ProviderResult};
use serde::Serialize;
use tracing::{debug, warn};

use crate::Provider;

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    recipient: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    body: &'a str,
    #[serde(skip_serializing_if = Metadata::is_empty)]
    metadata: &'a Metadata,
}

pub struct HttpChannelProvider {
    channel: Channel,
    base_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpChannelProvider {
    pub fn new(channel: Channel, base_url: Option<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is always valid");

        if base_url.is_none() {
            warn!(channel = %channel, "provider not configured: base URL missing");
        }

        Self { channel, base_url, api_key, client }
    }
}

#[async_trait]
impl Provider for HttpChannelProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
        metadata: &Metadata,
    ) -> Result<ProviderResult, ProviderError> {
        let base_url = self.base_url.as_ref().ok_or_else(|| {
            ProviderError::new(self.channel.as_str(), recipient, format!("{} provider is not configured", self.channel))
                .with_code("PROVIDER_UNCONFIGURED")
        })?;

        let mut request = self.client.post(base_url).json(&WebhookRequest { recipient, subject, body, metadata });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            let mut err = ProviderError::new(self.channel.as_str(), recipient, e.to_string());
            if e.is_timeout() {
                err = err.with_code("ETIMEDOUT");
            }
            err
        })?;

        let status = response.status();
        if status.is_success() {
            let raw_response = response.text().await.ok();
            debug!(channel = %self.channel, recipient, "provider accepted send");
            Ok(ProviderResult {
                provider_message_id: None,
                provider_name: self.channel.as_str().to_lowercase(),
                raw_response,
            })
        } else {
            let status_code = status.as_u16();
            let error_body = response.text().await.unwrap_or_default();
            Err(ProviderError::new(self.channel.as_str(), recipient, format!("HTTP {status_code}: {error_body}"))
                .with_status(status_code))
        }
    }

    fn ready(&self) -> bool {
        self.base_url.is_some()
    }
}
