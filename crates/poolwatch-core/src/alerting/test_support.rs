//! Fixtures shared by alerting and channel tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::channels::{Channel, ChannelError, ChannelKind, RetryPolicy};
use crate::models::{Alert, AlertStatus, Severity};

use super::Notification;

/// An open warning alert for `user-service/default/high_usage`
pub(crate) fn fired_alert() -> Alert {
    Alert {
        id: 1,
        target_name: "user-service".to_string(),
        instance_name: "default".to_string(),
        rule_name: "high_usage".to_string(),
        severity: Severity::Warning,
        message: "Pool usage is high: 85%".to_string(),
        status: AlertStatus::Fired,
        fired_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        resolved_at: None,
        notified_at: None,
        channels: Vec::new(),
    }
}

/// In-process channel that records what it was asked to send
pub(crate) struct RecordingChannel {
    name: String,
    fail: bool,
    sent: Mutex<Vec<Notification>>,
    calls: Mutex<u32>,
}

impl RecordingChannel {
    pub(crate) fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        })
    }

    pub(crate) fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        })
    }

    pub(crate) fn calls(&self) -> u32 {
        *self.calls.lock()
    }

    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub(crate) fn last(&self) -> Option<Notification> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Plugin
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        *self.calls.lock() += 1;
        if self.fail {
            return Err(ChannelError::Http("connection refused".to_string()));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}
