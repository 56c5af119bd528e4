//! Slack and Mattermost incoming webhooks
//!
//! Mattermost accepts Slack-compatible payloads, so both share one adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::alerting::Notification;
use crate::config::SlackConfig;
use crate::error::Result;
use crate::models::Severity;

use super::{parse_http_url, send_checked, Channel, ChannelError, ChannelKind};

/// Slack-style incoming webhook channel
pub struct SlackChannel {
    kind: ChannelKind,
    client: Client,
    webhook_url: url::Url,
    channel: Option<String>,
    username: String,
}

impl SlackChannel {
    /// Slack incoming webhook
    pub fn slack(config: &SlackConfig, client: Client) -> Result<Self> {
        Self::build(ChannelKind::Slack, config, client)
    }

    /// Mattermost incoming webhook
    pub fn mattermost(config: &SlackConfig, client: Client) -> Result<Self> {
        Self::build(ChannelKind::Mattermost, config, client)
    }

    fn build(kind: ChannelKind, config: &SlackConfig, client: Client) -> Result<Self> {
        Ok(Self {
            kind,
            client,
            webhook_url: parse_http_url(kind.as_str(), &config.webhook_url)?,
            channel: config.channel.clone().filter(|c| !c.is_empty()),
            username: config
                .username
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "Poolwatch".to_string()),
        })
    }

    fn payload(&self, notification: &Notification) -> SlackPayload {
        let alert = &notification.alert;

        let color = if notification.is_resolved() {
            "#28a745"
        } else {
            match alert.severity {
                Severity::Critical => "#dc3545",
                Severity::Warning => "#ffc107",
                Severity::Info => "#17a2b8",
            }
        };

        let mut fields = vec![
            SlackField {
                title: "Severity".to_string(),
                value: alert.severity.to_string(),
                short: true,
            },
            SlackField {
                title: "Status".to_string(),
                value: alert.status.as_str().to_string(),
                short: true,
            },
            SlackField {
                title: "Target".to_string(),
                value: alert.target_name.clone(),
                short: true,
            },
            SlackField {
                title: "Instance".to_string(),
                value: alert.instance_name.clone(),
                short: true,
            },
        ];
        if let Some(resolved_at) = alert.resolved_at {
            fields.push(SlackField {
                title: "Resolved At".to_string(),
                value: resolved_at.to_rfc3339(),
                short: false,
            });
        }

        SlackPayload {
            channel: self.channel.clone(),
            username: Some(self.username.clone()),
            text: notification.title(),
            attachments: vec![SlackAttachment {
                color: color.to_string(),
                title: format!("{}: {}", notification.headline(), alert.rule_name),
                text: alert.message.clone(),
                fields,
                footer: Some("Poolwatch Alerting".to_string()),
                ts: Some(alert.fired_at.timestamp()),
            }],
        }
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), ChannelError> {
        let request = self
            .client
            .post(self.webhook_url.clone())
            .json(&self.payload(notification));

        send_checked(self.name(), request).await?;

        info!(
            channel = self.name(),
            rule = %notification.alert.rule_name,
            "Slack-style notification sent"
        );
        Ok(())
    }
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    title: String,
    text: String,
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}
