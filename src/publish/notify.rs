//! Notification channels: Slack, Discord and generic JSON webhooks.
//!
//! Channels never fail past their own boundary. `send` and `ping` log the
//! underlying error and report `false`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{ChannelConfig, NotifyConfig};
use crate::error::NotifyError;

const TIMEOUT: Duration = Duration::from_secs(10);
const DISCORD_USER_AGENT: &str = "DiscordBot (https://github.com/annalist, 0.1)";

/// Outcome of the run a message reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Failure,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failure => "failure",
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "Commit run succeeded",
            DeliveryStatus::Failure => "Commit run had failures",
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `message`; `false` on any failure.
    async fn send(&self, message: &str, status: DeliveryStatus) -> bool;

    /// Liveness probe; `false` when the channel is unusable.
    async fn ping(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookKind {
    Slack,
    Discord,
    Generic,
}

/// A channel that POSTs JSON to a webhook URL.
pub struct WebhookChannel {
    kind: WebhookKind,
    name: String,
    url: Option<String>,
    http: reqwest::Client,
}

impl WebhookChannel {
    pub fn slack(url: Option<String>) -> Self {
        Self::new(WebhookKind::Slack, "slack", url)
    }

    pub fn discord(url: Option<String>) -> Self {
        Self::new(WebhookKind::Discord, "discord", url)
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        Self::new(WebhookKind::Generic, "webhook", Some(url.into()))
    }

    fn new(kind: WebhookKind, name: &str, url: Option<String>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            url: url.filter(|u| !u.trim().is_empty()),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        match config {
            ChannelConfig::Slack { .. } => Self::slack(config.resolved_url()),
            ChannelConfig::Discord { .. } => Self::discord(config.resolved_url()),
            ChannelConfig::Webhook { url } => Self::webhook(url.clone()),
        }
    }

    fn payload(&self, message: &str, status: DeliveryStatus) -> serde_json::Value {
        let time = Local::now().format("%Y-%m-%d %H:%M");
        match self.kind {
            WebhookKind::Slack => json!({
                "text": format!("*{}*\n{}\n\n```{}```", status.headline(), time, message),
            }),
            WebhookKind::Discord => json!({
                "content": format!("**{}**\n{}\n{}", status.headline(), time, message),
            }),
            WebhookKind::Generic => json!({
                "status": status.as_str(),
                "text": message,
            }),
        }
    }

    fn accepts(&self, status: reqwest::StatusCode) -> bool {
        match self.kind {
            WebhookKind::Slack => status == reqwest::StatusCode::OK,
            WebhookKind::Discord => {
                status == reqwest::StatusCode::OK || status == reqwest::StatusCode::NO_CONTENT
            }
            WebhookKind::Generic => status.is_success(),
        }
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), NotifyError> {
        let kind_name = match self.kind {
            WebhookKind::Slack => "slack",
            WebhookKind::Discord => "discord",
            WebhookKind::Generic => "webhook",
        };
        let url = self.url.as_deref().ok_or(NotifyError::NotConfigured(kind_name))?;

        let mut request = self.http.post(url).timeout(TIMEOUT).json(&payload);
        if self.kind == WebhookKind::Discord {
            request = request.header(reqwest::header::USER_AGENT, DISCORD_USER_AGENT);
        }
        let response = request.send().await.map_err(NotifyError::Http)?;

        let status = response.status();
        if !self.accepts(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str, status: DeliveryStatus) -> bool {
        match self.post(self.payload(message, status)).await {
            Ok(()) => {
                debug!("Notified {}", self.name);
                true
            }
            Err(e) => {
                warn!("Notification to {} failed: {}", self.name, e);
                false
            }
        }
    }

    async fn ping(&self) -> bool {
        self.send("[ping] annalist notification test", DeliveryStatus::Success).await
    }
}

/// Channels for every configured platform, in configuration order.
pub fn channels_from_config(config: &NotifyConfig) -> Vec<Arc<dyn NotificationChannel>> {
    config
        .platforms
        .iter()
        .map(|platform| {
            Arc::new(WebhookChannel::from_config(platform)) as Arc<dyn NotificationChannel>
        })
        .collect()
}
