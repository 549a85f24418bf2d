use crate::errors::{NotifierError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use utils::errors::HTTP_CLIENT_BUILD_FAILED;

/// Outbound side of the bot: deliver `text` to a channel or user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    async fn send(&self, target: &str, text: &str) -> Result<()>;
}

pub fn build_notifier(
    slack_webhook_url: Option<&str>,
    request_timeout: Duration,
) -> Result<Arc<dyn Notifier>> {
    match slack_webhook_url {
        Some(url) => Ok(Arc::new(SlackWebhookNotifier::new(
            url.to_string(),
            request_timeout,
        )?)),
        None => {
            warn!("No Slack webhook configured, notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    text: &'a str,
}

/// Posts to a Slack incoming webhook, overriding the channel per message.
pub struct SlackWebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackWebhookNotifier {
    pub fn new(webhook_url: String, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NotifierError::Notify(format!("{HTTP_CLIENT_BUILD_FAILED}: {e}")))?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for SlackWebhookNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    #[instrument(skip(self, target, text), fields(notify_to = %target))]
    async fn send(&self, target: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&SlackPayload {
                channel: target,
                text,
            })
            .send()
            .await
            .map_err(|e| NotifierError::Notify(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Notify(format!(
                "webhook returned {status}: {body}"
            )));
        }

        Ok(())
    }
}

/// Writes notifications to the log instead of a chat backend.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, target: &str, text: &str) -> Result<()> {
        info!(notify_to = %target, "{}", text);
        Ok(())
    }
}
