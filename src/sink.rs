//! Outbound delivery sinks.
//!
//! The sink is the engine's external collaborator for off-platform
//! delivery. The engine hands it rendered text per notification;
//! failures are soft — logged by the dispatcher, never retried by the
//! scheduler, and never able to retract a ledger claim.

use crate::config::WhatsAppSinkConfig;
use crate::reminder::OwnerId;
use async_trait::async_trait;
use std::collections::HashMap;

/// External delivery contract. New transports only need this trait.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Stable sink identifier (e.g. `whatsapp`).
    fn id(&self) -> &'static str;

    /// Deliver rendered text to the owner's external endpoint.
    async fn deliver(&self, owner: OwnerId, text: &str) -> anyhow::Result<()>;
}

/// Sink for deployments without an external gateway.
pub struct NullSink;

#[async_trait]
impl DeliverySink for NullSink {
    fn id(&self) -> &'static str {
        "null"
    }

    async fn deliver(&self, _owner: OwnerId, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// WhatsApp Business Cloud API sink.
#[derive(Clone)]
pub struct WhatsAppSink {
    access_token: String,
    phone_number_id: String,
    base_url: String,
    recipients: HashMap<i64, String>,
    client: reqwest::Client,
}

impl WhatsAppSink {
    pub fn new(config: &WhatsAppSinkConfig) -> Self {
        let recipients = config
            .recipients
            .iter()
            .filter_map(|(owner, number)| {
                owner.parse::<i64>().ok().map(|id| (id, number.clone()))
            })
            .collect();
        Self {
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            recipients,
            client: reqwest::Client::new(),
        }
    }

    fn recipient_for(&self, owner: OwnerId) -> Option<&str> {
        self.recipients.get(&owner.0).map(String::as_str)
    }
}

#[async_trait]
impl DeliverySink for WhatsAppSink {
    fn id(&self) -> &'static str {
        "whatsapp"
    }

    async fn deliver(&self, owner: OwnerId, text: &str) -> anyhow::Result<()> {
        if self.access_token.trim().is_empty() {
            anyhow::bail!("whatsapp access token is empty");
        }
        if self.phone_number_id.trim().is_empty() {
            anyhow::bail!("whatsapp phone_number_id is empty");
        }
        let Some(recipient) = self.recipient_for(owner) else {
            anyhow::bail!("no whatsapp number configured for owner {owner}");
        };

        let to = recipient.strip_prefix('+').unwrap_or(recipient);
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("whatsapp send failed ({status}): {body}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> WhatsAppSinkConfig {
        let mut recipients = HashMap::new();
        recipients.insert("42".to_owned(), "+6281234567890".to_owned());
        WhatsAppSinkConfig {
            access_token: "token".to_owned(),
            phone_number_id: "123".to_owned(),
            base_url: base_url.to_owned(),
            recipients,
        }
    }

    #[tokio::test]
    async fn deliver_posts_text_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123/messages"))
            .and(header("Authorization", "Bearer token"))
            .and(body_partial_json(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "6281234567890",
                "text": { "body": "Laporan\n\nKirim laporan" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WhatsAppSink::new(&config(&server.uri()));
        sink.deliver(OwnerId(42), "Laporan\n\nKirim laporan")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = WhatsAppSink::new(&config(&server.uri()));
        let err = sink.deliver(OwnerId(42), "x").await.unwrap_err();
        assert!(err.to_string().contains("whatsapp send failed"));
    }

    #[tokio::test]
    async fn unknown_owner_is_an_error_without_a_request() {
        let server = MockServer::start().await;
        let sink = WhatsAppSink::new(&config(&server.uri()));
        let err = sink.deliver(OwnerId(7), "x").await.unwrap_err();
        assert!(err.to_string().contains("no whatsapp number"));
    }

    #[tokio::test]
    async fn null_sink_always_succeeds() {
        NullSink.deliver(OwnerId(1), "anything").await.unwrap();
        assert_eq!(NullSink.id(), "null");
    }
}
