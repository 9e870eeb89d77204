use anyhow::Result;
use reqwest::Client;
use serde_json::json;

use crate::domain::events::NotificationEvent;

/// Posts JSON event envelopes to per-search webhook URLs.
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    #[must_use]
    pub const fn with_shared_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn send(&self, url: &str, event: &NotificationEvent) -> Result<()> {
        let payload = json!({
            "event": event.name(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "data": event,
        });

        let response = self.client.post(url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Webhook error: {} - {}", status, body));
        }

        Ok(())
    }
}
