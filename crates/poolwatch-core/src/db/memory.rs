//! In-memory alert store

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{Alert, AlertKey, AlertRule, AlertStatus, MaintenanceWindow};

use super::AlertStore;

#[derive(Default)]
struct State {
    alerts: BTreeMap<i64, Alert>,
    rules: BTreeMap<i64, AlertRule>,
    windows: BTreeMap<i64, MaintenanceWindow>,
    next_alert_id: i64,
    next_rule_id: i64,
    next_window_id: i64,
}

/// Store backed by process memory; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn save_alert(&self, alert: &Alert) -> Result<i64> {
        let mut state = self.state.write();

        if alert.is_fired() {
            let key = alert.key();
            if state.alerts.values().any(|a| a.is_fired() && a.key() == key) {
                return Err(Error::persistence(format!(
                    "an open alert already exists for {key}"
                )));
            }
        }

        let id = next_id(&mut state.next_alert_id);
        let mut stored = alert.clone();
        stored.id = id;
        state.alerts.insert(id, stored);
        Ok(id)
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let mut state = self.state.write();
        match state.alerts.get_mut(&alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(Error::not_found("alert", alert.id)),
        }
    }

    async fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        Ok(self.state.read().alerts.get(&id).cloned())
    }

    async fn get_active_alert_by_key(&self, key: &AlertKey) -> Result<Option<Alert>> {
        Ok(self
            .state
            .read()
            .alerts
            .values()
            .find(|a| a.is_fired() && a.key() == *key)
            .cloned())
    }

    async fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>> {
        Ok(self
            .state
            .read()
            .alerts
            .values()
            .rev()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_alert_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.state.read().rules.values().cloned().collect())
    }

    async fn get_alert_rule(&self, id: i64) -> Result<Option<AlertRule>> {
        Ok(self.state.read().rules.get(&id).cloned())
    }

    async fn get_alert_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        Ok(self
            .state
            .read()
            .rules
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<i64> {
        let mut state = self.state.write();
        if state.rules.values().any(|r| r.name == rule.name) {
            return Err(Error::validation(format!(
                "rule name '{}' already exists",
                rule.name
            )));
        }

        let id = next_id(&mut state.next_rule_id);
        let mut stored = rule.clone();
        stored.id = id;
        state.rules.insert(id, stored);
        Ok(id)
    }

    async fn update_alert_rule(&self, rule: &AlertRule) -> Result<bool> {
        let mut state = self.state.write();
        if state
            .rules
            .values()
            .any(|r| r.name == rule.name && r.id != rule.id)
        {
            return Err(Error::validation(format!(
                "rule name '{}' already exists",
                rule.name
            )));
        }

        match state.rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_alert_rule(&self, id: i64) -> Result<bool> {
        Ok(self.state.write().rules.remove(&id).is_some())
    }

    async fn get_all_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>> {
        Ok(self.state.read().windows.values().cloned().collect())
    }

    async fn save_maintenance_window(&self, window: &MaintenanceWindow) -> Result<i64> {
        let mut state = self.state.write();
        let id = next_id(&mut state.next_window_id);
        let mut stored = window.clone();
        stored.id = id;
        state.windows.insert(id, stored);
        Ok(id)
    }

    async fn delete_maintenance_window(&self, id: i64) -> Result<bool> {
        Ok(self.state.write().windows.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use chrono::Utc;

    fn fired(rule: &str) -> Alert {
        Alert {
            id: 0,
            target_name: "user-service".to_string(),
            instance_name: "default".to_string(),
            rule_name: rule.to_string(),
            severity: Severity::Warning,
            message: "Pool usage is high".to_string(),
            status: AlertStatus::Fired,
            fired_at: Utc::now(),
            resolved_at: None,
            notified_at: None,
            channels: vec![],
        }
    }

    #[tokio::test]
    async fn rejects_second_open_alert_for_key() {
        let store = MemoryStore::new();

        let id = store.save_alert(&fired("high_usage")).await.unwrap();
        assert_eq!(id, 1);
        assert!(store.save_alert(&fired("high_usage")).await.is_err());
        assert_eq!(store.save_alert(&fired("pending")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn resolved_alerts_are_not_active() {
        let store = MemoryStore::new();
        let id = store.save_alert(&fired("high_usage")).await.unwrap();
        let key = AlertKey::new("user-service", "default", "high_usage");

        let mut alert = store.get_active_alert_by_key(&key).await.unwrap().unwrap();
        assert_eq!(alert.id, id);

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        store.update_alert(&alert).await.unwrap();

        assert!(store.get_active_alert_by_key(&key).await.unwrap().is_none());
        assert_eq!(
            store.list_alerts(Some(AlertStatus::Resolved), 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn rule_names_are_unique() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let rule = AlertRule {
            id: 0,
            name: "high_usage".to_string(),
            condition: "usage > 80".to_string(),
            severity: Severity::Warning,
            message: String::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        store.save_alert_rule(&rule).await.unwrap();
        assert!(store.save_alert_rule(&rule).await.unwrap_err().is_validation());
    }
}
