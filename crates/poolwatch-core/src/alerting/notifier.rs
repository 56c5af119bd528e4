//! Notification delivery for alerts

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::channels::{send_with_retry, Channel, ChannelRegistry};
use crate::error::Result;
use crate::models::{Alert, AlertStatus, Severity};

use super::tracker::Transition;

const TEST_MESSAGE: &str = "This is a test alert from Poolwatch";

/// One message handed to every channel
#[derive(Debug, Clone)]
pub struct Notification {
    pub alert: Alert,
    pub transition: Transition,
    /// Synthetic alert sent on operator request
    pub test: bool,
}

impl Notification {
    pub fn new(alert: Alert, transition: Transition) -> Self {
        Self {
            alert,
            transition,
            test: false,
        }
    }

    /// A synthetic notification that does not correspond to a stored alert
    pub fn test(alert: Alert) -> Self {
        Self {
            alert,
            transition: Transition::Fire,
            test: true,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.transition == Transition::Resolve
    }

    /// Event name used in webhook payloads
    pub fn event_name(&self) -> &'static str {
        if self.is_resolved() {
            "alert.resolved"
        } else {
            "alert.fired"
        }
    }

    /// Short state label
    pub fn headline(&self) -> &'static str {
        if self.test {
            return "TEST";
        }
        match self.transition {
            Transition::Fire => "FIRING",
            Transition::Renotify => "STILL FIRING",
            Transition::Resolve => "RESOLVED",
        }
    }

    /// One-line summary used as message text or subject
    pub fn title(&self) -> String {
        format!(
            "[{}] {} {} on {}/{}",
            self.alert.severity.as_str().to_uppercase(),
            self.headline(),
            self.alert.rule_name,
            self.alert.target_name,
            self.alert.instance_name
        )
    }
}

/// Result of sending a notification through one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub channel: String,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Per-channel results of one fan-out
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub results: Vec<NotificationResult>,
}

impl DispatchReport {
    /// Channels that accepted the notification
    pub fn delivered_channels(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.channel.clone())
            .collect()
    }

    /// Number of channels that gave up
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Operator request for a synthetic alert
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestAlertRequest {
    #[serde(default)]
    pub severity: Option<String>,
    /// Channel names; all enabled channels when absent or empty
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of a test alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAlertResponse {
    pub targeted: Vec<String>,
    pub results: Vec<NotificationResult>,
}

/// Fans notifications out to channels concurrently
#[derive(Debug, Clone, Default)]
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Send to every channel in the registry
    pub async fn dispatch(
        &self,
        notification: &Notification,
        registry: &ChannelRegistry,
    ) -> DispatchReport {
        self.dispatch_to(notification, registry.channels()).await
    }

    /// Send to an explicit set of channels, each with its own retry policy
    pub async fn dispatch_to(
        &self,
        notification: &Notification,
        channels: &[Arc<dyn Channel>],
    ) -> DispatchReport {
        if channels.is_empty() {
            debug!(rule = %notification.alert.rule_name, "No channels enabled, nothing to send");
            return DispatchReport::default();
        }

        let sends = channels.iter().map(|channel| async move {
            let outcome = send_with_retry(channel.as_ref(), notification).await;
            let success = outcome.result.is_ok();

            metrics::counter!(
                "poolwatch_notifications_total",
                "channel" => channel.name().to_string(),
                "outcome" => if success { "success" } else { "failure" }
            )
            .increment(1);

            if let Err(e) = &outcome.result {
                error!(
                    channel = channel.name(),
                    rule = %notification.alert.rule_name,
                    attempts = outcome.attempts,
                    error = %e,
                    "Notification delivery failed"
                );
            }

            NotificationResult {
                channel: channel.name().to_string(),
                success,
                attempts: outcome.attempts,
                error: outcome.result.err().map(|e| e.to_string()),
                sent_at: Utc::now(),
            }
        });

        let report = DispatchReport {
            results: join_all(sends).await,
        };

        info!(
            rule = %notification.alert.rule_name,
            target = %notification.alert.target_name,
            transition = notification.transition.as_str(),
            delivered = report.results.len() - report.failures(),
            failed = report.failures(),
            "Notification dispatched"
        );
        report
    }

    /// Send a synthetic alert without touching any alert record
    pub async fn send_test(
        &self,
        request: &TestAlertRequest,
        registry: &ChannelRegistry,
    ) -> Result<TestAlertResponse> {
        let severity = match &request.severity {
            Some(s) => s.parse::<Severity>()?,
            None => Severity::Info,
        };

        let (channels, unknown, targeted) = match request.channels.as_deref() {
            Some(names) if !names.is_empty() => {
                let (found, unknown) = registry.select(names);
                (found, unknown, names.to_vec())
            }
            _ => (registry.channels().to_vec(), Vec::new(), registry.names()),
        };

        let now = Utc::now();
        let alert = Alert {
            id: 0,
            target_name: "poolwatch".to_string(),
            instance_name: "test".to_string(),
            rule_name: "test_alert".to_string(),
            severity,
            message: request
                .message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| TEST_MESSAGE.to_string()),
            status: AlertStatus::Fired,
            fired_at: now,
            resolved_at: None,
            notified_at: None,
            channels: Vec::new(),
        };

        let report = self.dispatch_to(&Notification::test(alert), &channels).await;

        let mut results = report.results;
        for name in unknown {
            warn!(channel = %name, "Test alert requested for unknown channel");
            results.push(NotificationResult {
                channel: name,
                success: false,
                attempts: 0,
                error: Some("unknown or disabled channel".to_string()),
                sent_at: now,
            });
        }

        Ok(TestAlertResponse { targeted, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::test_support::{fired_alert, RecordingChannel};
    use pretty_assertions::assert_eq;

    fn registry(channels: Vec<Arc<RecordingChannel>>) -> ChannelRegistry {
        ChannelRegistry::new(
            channels
                .into_iter()
                .map(|c| c as Arc<dyn Channel>)
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn titles_follow_transition() {
        let fire = Notification::new(fired_alert(), Transition::Fire);
        let resolve = Notification::new(fired_alert(), Transition::Resolve);

        assert_eq!(
            fire.title(),
            "[WARNING] FIRING high_usage on user-service/default"
        );
        assert_eq!(resolve.headline(), "RESOLVED");
        assert_eq!(resolve.event_name(), "alert.resolved");
        assert_eq!(Notification::test(fired_alert()).headline(), "TEST");
    }

    #[tokio::test(start_paused = true)]
    async fn partial_success_is_reported() {
        let ok = RecordingChannel::ok("slack");
        let broken = RecordingChannel::failing("discord");
        let registry = registry(vec![ok.clone(), broken.clone()]);

        let report = NotificationDispatcher::new()
            .dispatch(&Notification::new(fired_alert(), Transition::Fire), &registry)
            .await;

        assert_eq!(report.delivered_channels(), vec!["slack".to_string()]);
        assert_eq!(report.failures(), 1);
        assert_eq!(ok.calls(), 1);
        assert_eq!(broken.calls(), 3);
        let failed = report.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.attempts, 3);
        assert!(failed.error.is_some());
    }

    #[tokio::test]
    async fn test_alert_reports_unknown_channels() {
        let ok = RecordingChannel::ok("slack");
        let registry = registry(vec![ok.clone(), RecordingChannel::ok("email")]);

        let response = NotificationDispatcher::new()
            .send_test(
                &TestAlertRequest {
                    severity: Some("critical".to_string()),
                    channels: Some(vec!["slack".to_string(), "pagerduty".to_string()]),
                    message: None,
                },
                &registry,
            )
            .await
            .unwrap();

        assert_eq!(response.targeted, vec!["slack", "pagerduty"]);
        assert_eq!(response.results.len(), 2);
        assert!(response.results[0].success);
        assert!(!response.results[1].success);

        let sent = ok.last().unwrap();
        assert!(sent.test);
        assert_eq!(sent.alert.severity, Severity::Critical);
        assert_eq!(sent.alert.message, TEST_MESSAGE);
    }

    #[tokio::test]
    async fn test_alert_defaults_to_all_channels() {
        let registry = registry(vec![RecordingChannel::ok("slack"), RecordingChannel::ok("email")]);

        let response = NotificationDispatcher::new()
            .send_test(&TestAlertRequest::default(), &registry)
            .await
            .unwrap();

        assert_eq!(response.targeted, vec!["slack", "email"]);
        assert!(response.results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_alert_rejects_bad_severity() {
        let request = TestAlertRequest {
            severity: Some("urgent".to_string()),
            ..Default::default()
        };

        let err = NotificationDispatcher::new()
            .send_test(&request, &ChannelRegistry::default())
            .await
            .unwrap_err();

        assert!(err.is_validation());
    }
}
