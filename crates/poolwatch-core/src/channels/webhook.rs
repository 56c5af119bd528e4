//! Generic HTTP webhooks and plugins
//!
//! The built-in webhook and every configured plugin post the same JSON
//! envelope. Plugins additionally carry their own timeout and retry policy.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerting::Notification;
use crate::config::{PluginConfig, WebhookConfig};
use crate::error::{Error, Result};
use crate::models::{AlertStatus, Severity};

use super::{parse_http_url, send_checked, Channel, ChannelError, ChannelKind, RetryPolicy};

const PAYLOAD_VERSION: &str = "1.0";

/// Wire format posted to webhooks and plugins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginPayload {
    pub event: String,
    pub alert: PayloadAlert,
    pub metadata: PayloadMetadata,
}

/// Alert section of [`PluginPayload`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadAlert {
    pub id: i64,
    pub target_name: String,
    pub instance_name: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Metadata section of [`PluginPayload`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub timestamp: DateTime<Utc>,
    pub plugin_name: String,
    pub version: String,
}

impl PluginPayload {
    /// Envelope for one notification
    pub fn new(notification: &Notification, plugin_name: &str) -> Self {
        let alert = &notification.alert;
        Self {
            event: notification.event_name().to_string(),
            alert: PayloadAlert {
                id: alert.id,
                target_name: alert.target_name.clone(),
                instance_name: alert.instance_name.clone(),
                rule_name: alert.rule_name.clone(),
                severity: alert.severity,
                message: alert.message.clone(),
                status: alert.status,
                fired_at: alert.fired_at,
                resolved_at: alert.resolved_at,
            },
            metadata: PayloadMetadata {
                timestamp: Utc::now(),
                plugin_name: plugin_name.to_string(),
                version: PAYLOAD_VERSION.to_string(),
            },
        }
    }
}

/// HTTP channel posting [`PluginPayload`]s
pub struct WebhookChannel {
    name: String,
    kind: ChannelKind,
    client: Client,
    url: url::Url,
    method: Method,
    headers: HeaderMap,
    policy: RetryPolicy,
}

impl WebhookChannel {
    /// The built-in webhook channel
    pub fn webhook(config: &WebhookConfig, client: Client) -> Result<Self> {
        Ok(Self {
            name: ChannelKind::Webhook.as_str().to_string(),
            kind: ChannelKind::Webhook,
            client,
            url: parse_http_url("webhook", &config.url)?,
            method: parse_method("webhook", config.method.as_deref())?,
            headers: parse_headers("webhook", &config.headers)?,
            policy: RetryPolicy::default(),
        })
    }

    /// An operator-defined plugin with its own retry policy
    pub fn plugin(config: &PluginConfig, client: Client) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(Error::channel("plugin name must not be empty"));
        }

        Ok(Self {
            name: config.name.clone(),
            kind: ChannelKind::Plugin,
            client,
            url: parse_http_url(&config.name, &config.url)?,
            method: parse_method(&config.name, config.method.as_deref())?,
            headers: parse_headers(&config.name, &config.headers)?,
            policy: RetryPolicy::from_plugin(config.retry_count, config.retry_delay, config.timeout),
        })
    }
}

fn parse_method(channel: &str, method: Option<&str>) -> Result<Method> {
    let raw = method.unwrap_or("POST").trim().to_ascii_uppercase();
    Method::from_bytes(raw.as_bytes())
        .map_err(|_| Error::channel(format!("{channel}: invalid HTTP method '{raw}'")))
}

fn parse_headers(channel: &str, headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| Error::channel(format!("{channel}: invalid header name '{key}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::channel(format!("{channel}: invalid value for header '{key}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), ChannelError> {
        let payload = PluginPayload::new(notification, &self.name);

        let request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .timeout(self.policy.timeout)
            .json(&payload);

        send_checked(&self.name, request).await?;

        info!(
            channel = %self.name,
            url = %self.url,
            event = %payload.event,
            "Webhook notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::test_support::fired_alert;
    use crate::alerting::Transition;
    use crate::channels::send_with_retry;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plugin(url: String, retry_count: u32, retry_delay: Duration) -> PluginConfig {
        PluginConfig {
            name: "custom-handler".to_string(),
            enabled: true,
            url,
            method: Some("post".to_string()),
            headers: HashMap::from([("X-Api-Key".to_string(), "secret".to_string())]),
            timeout: Duration::from_secs(5),
            retry_count,
            retry_delay,
        }
    }

    #[test]
    fn payload_matches_wire_format() {
        let alert = fired_alert();
        let payload = PluginPayload::new(&Notification::new(alert, Transition::Fire), "custom-handler");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["event"], "alert.fired");
        assert_eq!(json["alert"]["id"], 1);
        assert_eq!(json["alert"]["target_name"], "user-service");
        assert_eq!(json["alert"]["severity"], "warning");
        assert_eq!(json["alert"]["status"], "fired");
        assert_eq!(json["alert"]["fired_at"], "2024-01-01T12:00:00Z");
        assert!(json["alert"]["resolved_at"].is_null());
        assert_eq!(json["metadata"]["plugin_name"], "custom-handler");
        assert_eq!(json["metadata"]["version"], "1.0");
    }

    #[test]
    fn resolve_uses_resolved_event() {
        let payload = PluginPayload::new(
            &Notification::new(fired_alert(), Transition::Resolve),
            "webhook",
        );

        assert_eq!(payload.event, "alert.resolved");
    }

    #[test]
    fn rejects_invalid_method_and_headers() {
        let mut config = plugin("http://localhost:1".to_string(), 1, Duration::ZERO);
        config.method = Some("NOT A METHOD".to_string());
        assert!(WebhookChannel::plugin(&config, Client::new()).is_err());

        let mut config = plugin("http://localhost:1".to_string(), 1, Duration::ZERO);
        config.headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(WebhookChannel::plugin(&config, Client::new()).is_err());
    }

    #[tokio::test]
    async fn plugin_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(header("X-Api-Key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .mount(&server)
            .await;

        let config = plugin(format!("{}/alerts", server.uri()), 3, Duration::from_millis(100));
        let channel = WebhookChannel::plugin(&config, Client::new()).unwrap();
        let notification = Notification::new(fired_alert(), Transition::Fire);

        let started = Instant::now();
        let outcome = send_with_retry(&channel, &notification).await;

        assert!(outcome.result.is_ok(), "{:?}", outcome.result);
        assert_eq!(outcome.attempts, 3);
        // 100ms then 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn plugin_failure_is_reported_after_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = plugin(server.uri(), 2, Duration::from_millis(10));
        let channel = WebhookChannel::plugin(&config, Client::new()).unwrap();

        let outcome = send_with_retry(&channel, &Notification::new(fired_alert(), Transition::Fire)).await;

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(
            outcome.result,
            Err(ChannelError::Status { status: 503, .. })
        ));
    }
}
