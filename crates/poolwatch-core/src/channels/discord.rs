//! Discord webhooks

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::alerting::Notification;
use crate::config::DiscordConfig;
use crate::error::Result;
use crate::models::Severity;

use super::{parse_http_url, send_checked, Channel, ChannelError, ChannelKind};

/// Discord webhook channel
pub struct DiscordChannel {
    client: Client,
    webhook_url: url::Url,
    username: Option<String>,
}

impl DiscordChannel {
    /// Create from configuration
    pub fn new(config: &DiscordConfig, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            webhook_url: parse_http_url("discord", &config.webhook_url)?,
            username: config.username.clone().filter(|u| !u.is_empty()),
        })
    }

    fn payload(&self, notification: &Notification) -> DiscordPayload {
        let alert = &notification.alert;

        let color = if notification.is_resolved() {
            0x28a745
        } else {
            match alert.severity {
                Severity::Critical => 0xdc3545,
                Severity::Warning => 0xffc107,
                Severity::Info => 0x17a2b8,
            }
        };

        DiscordPayload {
            username: self.username.clone(),
            content: notification.title(),
            embeds: vec![DiscordEmbed {
                title: format!("{}: {}", notification.headline(), alert.rule_name),
                description: alert.message.clone(),
                color,
                fields: vec![
                    DiscordField {
                        name: "Target".to_string(),
                        value: format!("{} / {}", alert.target_name, alert.instance_name),
                        inline: true,
                    },
                    DiscordField {
                        name: "Severity".to_string(),
                        value: alert.severity.to_string(),
                        inline: true,
                    },
                ],
                timestamp: alert.fired_at.to_rfc3339(),
            }],
        }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), ChannelError> {
        let request = self
            .client
            .post(self.webhook_url.clone())
            .json(&self.payload(notification));

        send_checked(self.name(), request).await?;

        info!(rule = %notification.alert.rule_name, "Discord notification sent");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    content: String,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<DiscordField>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}
