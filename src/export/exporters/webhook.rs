//! Webhook exporter - 以 JSON POST 每条消息

use crate::export::{DeliveryScope, Exporter};
use crate::model::Message;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

/// Webhook exporter
#[derive(Debug)]
pub struct WebhookExporter {
    client: Client,
    url: Url,
    token: Option<String>,
}

impl WebhookExporter {
    pub fn new(url: impl AsRef<str>, token: Option<String>) -> Result<Self> {
        let url = Url::parse(url.as_ref()).map_err(|e| anyhow!("invalid webhook url {:?}: {}", url.as_ref(), e))?;
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow!("failed to create HTTP client: {}", e))?;

        Ok(Self { client, url, token })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Exporter for WebhookExporter {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle_message(&self, scope: &DeliveryScope, message: &Message) -> Result<()> {
        let mut request = self.client.post(self.url.clone()).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            biased;
            _ = scope.done() => return Err(anyhow!("delivery to {} abandoned: scope expired", self.url)),
            response = request.send() => response.map_err(|e| anyhow!("HTTP request failed: {}", e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("webhook {} responded with {}", self.url, status));
        }

        debug!(exporter = "webhook", url = %self.url, name = %message.name, "Message posted");
        Ok(())
    }
}
