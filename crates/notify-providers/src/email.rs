//! EMAIL channel provider, backed by SMTP via `lettre` — the one channel
//! this codebase's own dependency set already anticipates.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as SmtpMessage, Tokio1Executor};
use notify_common::{Channel, Metadata, ProviderCredentials, ProviderError, ProviderResult};
use tracing::{debug, warn};

use crate::Provider;

pub struct EmailProvider {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_address: Option<String>,
}

impl EmailProvider {
    /// Builds the transport eagerly from credentials so `ready()` is a
    /// cheap synchronous check rather than a deferred connection attempt.
    pub fn new(creds: &ProviderCredentials) -> Self {
        let transport = (|| {
            let host = creds.smtp_host.as_deref()?;
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host).ok()?.port(creds.smtp_port);

            if let (Some(user), Some(pass)) = (&creds.smtp_username, &creds.smtp_password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }

            Some(builder.build())
        })();

        if transport.is_none() {
            warn!("EMAIL provider not configured: SMTP_HOST missing or invalid");
        }

        Self { transport, from_address: creds.smtp_from_address.clone() }
    }
}

#[async_trait]
impl Provider for EmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
        _metadata: &Metadata,
    ) -> Result<ProviderResult, ProviderError> {
        let (transport, from_address) = match (&self.transport, &self.from_address) {
            (Some(t), Some(f)) => (t, f),
            _ => {
                return Err(ProviderError::new("email", recipient, "EMAIL provider is not configured")
                    .with_code("PROVIDER_UNCONFIGURED"))
            }
        };

        let from: Mailbox = from_address
            .parse()
            .map_err(|e| ProviderError::new("email", recipient, format!("invalid from address: {e}")))?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| ProviderError::new("email", recipient, format!("invalid recipient address: {e}")))?;

        let message = SmtpMessage::builder()
            .from(from)
            .to(to)
            .subject(subject.unwrap_or_default())
            .body(body.to_string())
            .map_err(|e| ProviderError::new("email", recipient, format!("failed to build message: {e}")))?;

        match transport.send(message).await {
            Ok(response) => {
                debug!(recipient, code = ?response.code(), "email sent");
                Ok(ProviderResult {
                    provider_message_id: None,
                    provider_name: "email".to_string(),
                    raw_response: Some(format!("{:?}", response.code())),
                })
            }
            Err(e) => Err(ProviderError::new("email", recipient, e.to_string()).with_cause(e.to_string())),
        }
    }

    fn ready(&self) -> bool {
        self.transport.is_some() && self.from_address.is_some()
    }
}

#[cfg(test)]
mod tests {
    use notify_common::ProviderCredentials;

    use super::*;

    fn creds(smtp_host: Option<&str>) -> ProviderCredentials {
        ProviderCredentials {
            smtp_host: smtp_host.map(str::to_string),
            smtp_port: 587,
            smtp_username: Some("user".to_string()),
            smtp_password: Some("pass".to_string()),
            smtp_from_address: Some("notifications@example.com".to_string()),
            sms_provider_url: None,
            sms_provider_api_key: None,
            whatsapp_provider_url: None,
            whatsapp_provider_api_key: None,
            push_provider_url: None,
            push_provider_api_key: None,
        }
    }

    #[test]
    fn not_ready_without_an_smtp_host() {
        let provider = EmailProvider::new(&creds(None));
        assert!(!provider.ready());
    }

    #[test]
    fn ready_once_host_and_from_address_are_configured() {
        let provider = EmailProvider::new(&creds(Some("smtp.example.com")));
        assert!(provider.ready());
    }

    #[tokio::test]
    async fn send_without_a_configured_transport_is_provider_unconfigured() {
        let provider = EmailProvider::new(&creds(None));
        let err = provider.send("user@example.com", Some("hi"), "body", &Metadata::new()).await.unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some("PROVIDER_UNCONFIGURED"));
    }
}
