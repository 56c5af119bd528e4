//! Notion database pages
//!
//! Each notification becomes a page in the configured database.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use crate::alerting::Notification;
use crate::config::NotionConfig;
use crate::error::{Error, Result};

use super::{parse_http_url, send_checked, Channel, ChannelError, ChannelKind};

const NOTION_VERSION: &str = "2022-06-28";

/// Notion channel
pub struct NotionChannel {
    client: Client,
    pages_url: url::Url,
    token: String,
    database_id: String,
}

impl NotionChannel {
    pub fn new(config: &NotionConfig, client: Client) -> Result<Self> {
        if config.token.is_empty() || config.database_id.is_empty() {
            return Err(Error::channel("notion: token and database_id are required"));
        }

        let base = parse_http_url("notion", &config.api_url)?;
        let pages_url = base
            .join("v1/pages")
            .map_err(|e| Error::channel(format!("notion: invalid api_url: {e}")))?;

        Ok(Self {
            client,
            pages_url,
            token: config.token.clone(),
            database_id: config.database_id.clone(),
        })
    }

    fn page(&self, notification: &Notification) -> Value {
        let alert = &notification.alert;
        json!({
            "parent": { "database_id": self.database_id },
            "properties": {
                "Name": { "title": [{ "text": { "content": notification.title() } }] },
                "Rule": { "rich_text": [{ "text": { "content": alert.rule_name } }] },
                "Target": { "rich_text": [{ "text": { "content": format!("{}/{}", alert.target_name, alert.instance_name) } }] },
                "Severity": { "select": { "name": alert.severity.as_str() } },
                "Status": { "select": { "name": alert.status.as_str() } },
                "Message": { "rich_text": [{ "text": { "content": alert.message } }] },
                "Fired At": { "date": { "start": alert.fired_at.to_rfc3339() } },
            }
        })
    }
}

#[async_trait]
impl Channel for NotionChannel {
    fn name(&self) -> &str {
        "notion"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Notion
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), ChannelError> {
        let request = self
            .client
            .post(self.pages_url.clone())
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&self.page(notification));

        send_checked(self.name(), request).await?;

        info!(rule = %notification.alert.rule_name, "Notion page created");
        Ok(())
    }
}
