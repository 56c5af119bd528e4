//! Notification channels
//!
//! Every delivery mechanism implements [`Channel`]. The [`ChannelRegistry`]
//! builds the enabled channels from configuration; the dispatcher wraps each
//! `send` in the channel's [`RetryPolicy`].

mod discord;
mod email;
mod notion;
mod retry;
mod slack;
mod webhook;

pub use discord::DiscordChannel;
pub use email::EmailChannel;
pub use notion::NotionChannel;
pub use retry::{retry_with_backoff, send_with_retry, RetryOutcome, RetryPolicy};
pub use slack::SlackChannel;
pub use webhook::{PluginPayload, WebhookChannel};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::alerting::Notification;
use crate::config::ChannelsConfig;
use crate::error::{Error, Result};

/// Default per-attempt timeout for built-in channels
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of delivery mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    Discord,
    Mattermost,
    Webhook,
    Email,
    Notion,
    Plugin,
}

impl ChannelKind {
    /// Lowercase name; also the registry name of built-in channels
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
            ChannelKind::Mattermost => "mattermost",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Email => "email",
            ChannelKind::Notion => "notion",
            ChannelKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured notification destination
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name within the registry
    fn name(&self) -> &str;

    /// Delivery mechanism
    fn kind(&self) -> ChannelKind;

    /// Retry policy applied around [`Channel::send`]
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Deliver one notification (a single attempt)
    async fn send(&self, notification: &Notification) -> std::result::Result<(), ChannelError>;
}

/// Notification errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{channel} returned {status}: {body}")]
    Status {
        channel: String,
        status: u16,
        body: String,
    },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Http(err.to_string())
    }
}

/// Send a request and treat any non-2xx status as a failure
pub(crate) async fn send_checked(
    channel: &str,
    request: reqwest::RequestBuilder,
) -> std::result::Result<(), ChannelError> {
    let response = request.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ChannelError::Status {
            channel: channel.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    debug!(channel, status = %response.status(), "Channel accepted notification");
    Ok(())
}

/// Check a webhook URL is absolute http(s)
pub(crate) fn parse_http_url(channel: &str, raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::channel(format!("{channel}: invalid URL '{raw}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::channel(format!(
            "{channel}: unsupported URL scheme '{other}'"
        ))),
    }
}

/// Shared HTTP client for all webhook-style channels
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("poolwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))
}

/// Set of enabled channels
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<dyn Channel>>,
}

impl ChannelRegistry {
    /// Registry over explicit channels
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.name().to_string()) {
                return Err(Error::channel(format!(
                    "duplicate channel name '{}'",
                    channel.name()
                )));
            }
        }
        Ok(Self { channels })
    }

    /// Build every enabled channel from configuration
    pub fn from_config(config: &ChannelsConfig) -> Result<Self> {
        let client = http_client()?;
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

        if config.slack.enabled {
            channels.push(Arc::new(SlackChannel::slack(&config.slack, client.clone())?));
        }
        if config.mattermost.enabled {
            channels.push(Arc::new(SlackChannel::mattermost(
                &config.mattermost,
                client.clone(),
            )?));
        }
        if config.discord.enabled {
            channels.push(Arc::new(DiscordChannel::new(&config.discord, client.clone())?));
        }
        if config.webhook.enabled {
            channels.push(Arc::new(WebhookChannel::webhook(&config.webhook, client.clone())?));
        }
        if config.email.enabled {
            channels.push(Arc::new(EmailChannel::new(&config.email)?));
        }
        if config.notion.enabled {
            channels.push(Arc::new(NotionChannel::new(&config.notion, client.clone())?));
        }
        for plugin in config.plugins.iter().filter(|p| p.enabled) {
            channels.push(Arc::new(WebhookChannel::plugin(plugin, client.clone())?));
        }

        Self::new(channels)
    }

    /// All enabled channels
    pub fn channels(&self) -> &[Arc<dyn Channel>] {
        &self.channels
    }

    /// Names of all enabled channels
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Look up a channel by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.iter().find(|c| c.name() == name).cloned()
    }

    /// Split requested names into known channels and unknown names
    pub fn select(&self, names: &[String]) -> (Vec<Arc<dyn Channel>>, Vec<String>) {
        let mut found = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.get(name) {
                Some(channel) => found.push(channel),
                None => unknown.push(name.clone()),
            }
        }
        (found, unknown)
    }

    /// Number of enabled channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is enabled
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .finish()
    }
}
