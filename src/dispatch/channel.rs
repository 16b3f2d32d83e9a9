//! Outbound messaging channels.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ChannelConfig;
use crate::error::ChannelError;

const SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Sends a rendered alert text to the broadcast target.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), ChannelError>;
}

#[derive(Debug, Serialize, PartialEq)]
struct LineMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize, PartialEq)]
struct LineBroadcast<'a> {
    messages: Vec<LineMessage<'a>>,
}

impl<'a> LineBroadcast<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            messages: vec![LineMessage { kind: "text", text }],
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct WebhookPayload<'a> {
    event: &'static str,
    text: &'a str,
}

/// LINE Messaging API broadcast.
pub struct LineChannel {
    client: reqwest::Client,
    token: String,
    broadcast_url: String,
}

/// Generic JSON webhook (n8n, Zapier and similar).
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

/// The configured messaging channel.
pub enum MessagingChannel {
    Line(LineChannel),
    Webhook(WebhookChannel),
}

impl MessagingChannel {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(match config {
            ChannelConfig::Line {
                token,
                broadcast_url,
            } => MessagingChannel::Line(LineChannel {
                client,
                token: token.clone(),
                broadcast_url: broadcast_url.clone(),
            }),
            ChannelConfig::Webhook { url } => MessagingChannel::Webhook(WebhookChannel {
                client,
                url: url.clone(),
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessagingChannel::Line(_) => "line",
            MessagingChannel::Webhook(_) => "webhook",
        }
    }
}

#[async_trait]
impl Notifier for MessagingChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        match self {
            MessagingChannel::Line(line) => line.send(text).await,
            MessagingChannel::Webhook(webhook) => webhook.send(text).await,
        }
    }
}

impl LineChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.broadcast_url)
            .bearer_auth(&self.token)
            .json(&LineBroadcast::text(text))
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ChannelError::Status {
                channel: "line",
                status: status.as_u16(),
            });
        }

        debug!("LINE broadcast sent");
        Ok(())
    }
}

impl WebhookChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let payload = WebhookPayload {
            event: "water_alert",
            text,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status {
                channel: "webhook",
                status: status.as_u16(),
            });
        }

        debug!(url = %self.url, "Webhook notification sent");
        Ok(())
    }
}
