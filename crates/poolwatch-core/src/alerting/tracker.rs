//! Alert lifecycle state machine
//!
//! [`AlertTracker`] is the only component that writes alert status. Every
//! observation for one [`AlertKey`] runs under that key's async mutex, so a
//! timer sweep and a pushed sample can never both fire the same alert.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::AlertStore;
use crate::error::Result;
use crate::models::{Alert, AlertKey, AlertRule, AlertStatus, MetricSample};

use super::notifier::NotificationResult;
use super::template::{render_message, TemplateContext};

/// Kind of lifecycle change that warrants a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A new alert was opened
    Fire,
    /// An open alert is still breached and its cooldown has elapsed
    Renotify,
    /// An open alert was closed
    Resolve,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Fire => "fire",
            Transition::Renotify => "renotify",
            Transition::Resolve => "resolve",
        }
    }
}

/// A persisted transition together with the alert as stored
#[derive(Debug, Clone)]
pub struct AlertTransition {
    pub transition: Transition,
    pub alert: Alert,
}

/// Per-key fire / re-notify / resolve bookkeeping
pub struct AlertTracker {
    store: Arc<dyn AlertStore>,
    cooldown: chrono::Duration,
    locks: DashMap<AlertKey, Arc<Mutex<()>>>,
}

impl AlertTracker {
    /// Create a tracker writing through `store`
    pub fn new(store: Arc<dyn AlertStore>, cooldown: Duration) -> Self {
        Self {
            store,
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &AlertKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the key's mutex once no other task holds or waits on it
    fn release(&self, key: &AlertKey, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(key, |_, held| Arc::strong_count(held) == 1);
    }

    /// Number of keys with an in-flight operation
    pub fn tracked_keys(&self) -> usize {
        self.locks.len()
    }

    /// Apply one evaluation result for `rule` on `sample`.
    ///
    /// The returned transition has already been persisted.
    pub async fn observe(
        &self,
        rule: &AlertRule,
        sample: &MetricSample,
        breached: bool,
        suppressed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTransition>> {
        let key = AlertKey::new(&sample.target_name, &sample.instance_name, &rule.name);
        let lock = self.lock_for(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply(&key, rule, sample, breached, suppressed, now).await
        };
        self.release(&key, lock);
        outcome
    }

    async fn apply(
        &self,
        key: &AlertKey,
        rule: &AlertRule,
        sample: &MetricSample,
        breached: bool,
        suppressed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTransition>> {
        let open = self.store.get_active_alert_by_key(key).await?;

        match (open, breached) {
            (None, false) => Ok(None),
            (None, true) if suppressed => {
                debug!(key = %key, "Breach suppressed by maintenance window");
                Ok(None)
            }
            (None, true) => {
                let ctx = TemplateContext::for_sample(sample, &rule.name, rule.severity);
                let mut alert = Alert {
                    id: 0,
                    target_name: key.target_name.clone(),
                    instance_name: key.instance_name.clone(),
                    rule_name: key.rule_name.clone(),
                    severity: rule.severity,
                    message: render_message(&rule.message, &ctx),
                    status: AlertStatus::Fired,
                    fired_at: now,
                    resolved_at: None,
                    notified_at: None,
                    channels: Vec::new(),
                };
                alert.id = self.store.save_alert(&alert).await?;

                metrics::counter!("poolwatch_alerts_fired_total", "severity" => rule.severity.as_str())
                    .increment(1);
                info!(
                    alert_id = alert.id,
                    rule = %rule.name,
                    target = %key.target_name,
                    instance = %key.instance_name,
                    severity = %rule.severity,
                    "Alert fired"
                );

                Ok(Some(AlertTransition {
                    transition: Transition::Fire,
                    alert,
                }))
            }
            (Some(_), true) if suppressed => {
                debug!(key = %key, "Open alert not refreshed during maintenance window");
                Ok(None)
            }
            (Some(mut alert), true) => {
                let anchor = alert.notified_at.unwrap_or(alert.fired_at);
                if now - anchor <= self.cooldown {
                    return Ok(None);
                }

                let ctx = TemplateContext::for_sample(sample, &rule.name, alert.severity);
                alert.message = render_message(&rule.message, &ctx);
                alert.notified_at = Some(now);
                self.store.update_alert(&alert).await?;

                debug!(alert_id = alert.id, rule = %rule.name, "Cooldown elapsed, re-notifying");
                Ok(Some(AlertTransition {
                    transition: Transition::Renotify,
                    alert,
                }))
            }
            (Some(alert), false) => {
                let alert = self.resolve(alert, now).await?;
                Ok(Some(AlertTransition {
                    transition: Transition::Resolve,
                    alert,
                }))
            }
        }
    }

    /// Operator-initiated resolution; a no-op for unknown or resolved alerts
    pub async fn resolve_manually(
        &self,
        alert_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTransition>> {
        let Some(alert) = self.store.get_alert(alert_id).await? else {
            return Ok(None);
        };

        let key = alert.key();
        let lock = self.lock_for(&key);
        let outcome = {
            let _guard = lock.lock().await;

            // Re-read under the lock; a sweep may have resolved it meanwhile
            match self.store.get_alert(alert_id).await {
                Ok(Some(alert)) if alert.is_fired() => self
                    .resolve(alert, now)
                    .await
                    .map(|alert| {
                        Some(AlertTransition {
                            transition: Transition::Resolve,
                            alert,
                        })
                    }),
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            }
        };
        self.release(&key, lock);
        outcome
    }

    /// Record which channels accepted a notification for `alert_id`
    pub async fn record_delivery(
        &self,
        alert_id: i64,
        results: &[NotificationResult],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let delivered: Vec<&str> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.channel.as_str())
            .collect();
        if delivered.is_empty() {
            return Ok(());
        }

        let Some(alert) = self.store.get_alert(alert_id).await? else {
            return Ok(());
        };
        let key = alert.key();
        let lock = self.lock_for(&key);
        let outcome = {
            let _guard = lock.lock().await;
            match self.store.get_alert(alert_id).await {
                Ok(Some(mut alert)) => {
                    alert.add_channels(delivered);
                    alert.notified_at = Some(now);
                    self.store.update_alert(&alert).await
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            }
        };
        self.release(&key, lock);
        outcome
    }

    async fn resolve(&self, mut alert: Alert, now: DateTime<Utc>) -> Result<Alert> {
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        self.store.update_alert(&alert).await?;

        metrics::counter!("poolwatch_alerts_resolved_total").increment(1);
        info!(
            alert_id = alert.id,
            rule = %alert.rule_name,
            target = %alert.target_name,
            instance = %alert.instance_name,
            "Alert resolved"
        );
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::Severity;
    use chrono::TimeZone;

    fn rule() -> AlertRule {
        let now = Utc::now();
        AlertRule {
            id: 1,
            name: "high_usage".to_string(),
            condition: "usage > 80".to_string(),
            severity: Severity::Warning,
            message: "Pool usage is high: {{Usage}}%".to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample(active: i64) -> MetricSample {
        let mut sample = MetricSample::new("user-service", "default");
        sample.active = active;
        sample.max = 100;
        sample
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn tracker() -> (Arc<MemoryStore>, AlertTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = AlertTracker::new(store.clone(), Duration::from_secs(300));
        (store, tracker)
    }

    fn delivered(channel: &str) -> NotificationResult {
        NotificationResult {
            channel: channel.to_string(),
            success: true,
            attempts: 1,
            error: None,
            sent_at: t0(),
        }
    }

    #[tokio::test]
    async fn fires_once_per_key() {
        let (store, tracker) = tracker();

        let first = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();
        let second = tracker
            .observe(&rule(), &sample(90), true, false, t0() + chrono::Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(first.transition, Transition::Fire);
        assert_eq!(first.alert.message, "Pool usage is high: 85%");
        assert!(second.is_none());

        let fired = store.list_alerts(Some(AlertStatus::Fired), 10).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, first.alert.id);
    }

    #[tokio::test]
    async fn resolves_on_recovery_and_is_idempotent() {
        let (store, tracker) = tracker();
        let fired = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();

        let resolved_at = t0() + chrono::Duration::seconds(30);
        let resolved = tracker
            .observe(&rule(), &sample(50), false, false, resolved_at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transition, Transition::Resolve);

        let stored = store.get_alert(fired.alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert_eq!(stored.resolved_at, Some(resolved_at));

        let again = tracker
            .observe(&rule(), &sample(50), false, false, resolved_at)
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(tracker
            .resolve_manually(fired.alert.id, resolved_at)
            .await
            .unwrap()
            .is_none());
        assert!(tracker.resolve_manually(999, resolved_at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suppression_blocks_new_alerts_but_not_resolution() {
        let (store, tracker) = tracker();

        let suppressed = tracker
            .observe(&rule(), &sample(85), true, true, t0())
            .await
            .unwrap();
        assert!(suppressed.is_none());
        assert!(store.list_alerts(None, 10).await.unwrap().is_empty());

        let fired = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();

        // Still breached inside a window: the open alert stays open
        let later = t0() + chrono::Duration::minutes(10);
        assert!(tracker
            .observe(&rule(), &sample(95), true, true, later)
            .await
            .unwrap()
            .is_none());
        let stored = store.get_alert(fired.alert.id).await.unwrap().unwrap();
        assert!(stored.is_fired());
        assert_eq!(stored.notified_at, None);

        let resolved = tracker
            .observe(&rule(), &sample(40), false, true, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transition, Transition::Resolve);
    }

    #[tokio::test]
    async fn renotifies_after_cooldown() {
        let (store, tracker) = tracker();
        let fired = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();

        let early = tracker
            .observe(&rule(), &sample(88), true, false, t0() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(early.is_none());

        // Exactly one cooldown later is not yet past it
        let boundary = tracker
            .observe(&rule(), &sample(88), true, false, t0() + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(boundary.is_none());

        let due = t0() + chrono::Duration::minutes(5) + chrono::Duration::seconds(1);
        let renotify = tracker
            .observe(&rule(), &sample(92), true, false, due)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renotify.transition, Transition::Renotify);
        assert_eq!(renotify.alert.id, fired.alert.id);
        assert_eq!(renotify.alert.message, "Pool usage is high: 92%");

        let stored = store.get_alert(fired.alert.id).await.unwrap().unwrap();
        assert_eq!(stored.notified_at, Some(due));

        // Cooldown restarts from the last notification
        let soon = tracker
            .observe(&rule(), &sample(92), true, false, due + chrono::Duration::minutes(2))
            .await
            .unwrap();
        assert!(soon.is_none());
    }

    #[tokio::test]
    async fn manual_resolve_then_fresh_alert() {
        let (store, tracker) = tracker();
        let fired = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();

        let manual = tracker
            .resolve_manually(fired.alert.id, t0() + chrono::Duration::minutes(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manual.alert.status, AlertStatus::Resolved);

        let fresh = tracker
            .observe(&rule(), &sample(85), true, false, t0() + chrono::Duration::minutes(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.transition, Transition::Fire);
        assert_ne!(fresh.alert.id, fired.alert.id);
        assert_eq!(store.list_alerts(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delivery_merges_channels_and_stamps_notified_at() {
        let (store, tracker) = tracker();
        let fired = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();

        let failed = NotificationResult {
            success: false,
            error: Some("boom".to_string()),
            ..delivered("discord")
        };
        let at = t0() + chrono::Duration::seconds(2);
        tracker
            .record_delivery(fired.alert.id, &[delivered("slack"), failed], at)
            .await
            .unwrap();
        tracker
            .record_delivery(fired.alert.id, &[delivered("email"), delivered("slack")], at)
            .await
            .unwrap();

        let stored = store.get_alert(fired.alert.id).await.unwrap().unwrap();
        assert_eq!(stored.channels, vec!["email", "slack"]);
        assert_eq!(stored.notified_at, Some(at));
    }

    #[tokio::test]
    async fn idle_keys_release_their_locks() {
        let (_store, tracker) = tracker();

        let fired = tracker
            .observe(&rule(), &sample(85), true, false, t0())
            .await
            .unwrap()
            .unwrap();
        tracker
            .record_delivery(fired.alert.id, &[delivered("slack")], t0())
            .await
            .unwrap();
        tracker
            .observe(&rule(), &sample(50), false, false, t0() + chrono::Duration::minutes(1))
            .await
            .unwrap();

        let mut other = sample(99);
        other.instance_name = "replica".to_string();
        let second = tracker
            .observe(&rule(), &other, true, false, t0())
            .await
            .unwrap()
            .unwrap();
        tracker
            .resolve_manually(second.alert.id, t0() + chrono::Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(tracker.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn waiting_task_keeps_the_lock_alive() {
        let (_store, tracker) = tracker();
        let key = AlertKey::new("user-service", "default", "high_usage");

        let held = tracker.lock_for(&key);
        let waiter = tracker.lock_for(&key);
        tracker.release(&key, held);
        assert_eq!(tracker.tracked_keys(), 1);

        tracker.release(&key, waiter);
        assert_eq!(tracker.tracked_keys(), 0);
    }
}
