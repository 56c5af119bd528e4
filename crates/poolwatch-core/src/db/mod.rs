//! Storage layer for Poolwatch
//!
//! The alert engine only talks to storage through [`AlertStore`]. An in-memory
//! store is used when no database URL is configured; otherwise rules, alerts
//! and maintenance windows live in PostgreSQL.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Alert, AlertKey, AlertRule, AlertStatus, MaintenanceWindow};

/// Persistence contract consumed by the alert engine
#[async_trait]
pub trait AlertStore: Send + Sync {
    // --- Alerts ---

    /// Insert a new alert and return its id
    async fn save_alert(&self, alert: &Alert) -> Result<i64>;

    /// Overwrite an existing alert
    async fn update_alert(&self, alert: &Alert) -> Result<()>;

    /// Get an alert by id
    async fn get_alert(&self, id: i64) -> Result<Option<Alert>>;

    /// The open alert for a key, if any
    async fn get_active_alert_by_key(&self, key: &AlertKey) -> Result<Option<Alert>>;

    /// Most recent alerts first, optionally filtered by status
    async fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>>;

    // --- Alert Rules ---

    /// All rules, enabled or not
    async fn get_alert_rules(&self) -> Result<Vec<AlertRule>>;

    /// Get a rule by id
    async fn get_alert_rule(&self, id: i64) -> Result<Option<AlertRule>>;

    /// Get a rule by its unique name
    async fn get_alert_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>>;

    /// Insert a rule and return its id
    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<i64>;

    /// Overwrite a rule; false when it does not exist
    async fn update_alert_rule(&self, rule: &AlertRule) -> Result<bool>;

    /// Delete a rule; false when it does not exist
    async fn delete_alert_rule(&self, id: i64) -> Result<bool>;

    // --- Maintenance Windows ---

    /// All maintenance windows
    async fn get_all_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>>;

    /// Insert a window and return its id
    async fn save_maintenance_window(&self, window: &MaintenanceWindow) -> Result<i64>;

    /// Delete a window; false when it does not exist
    async fn delete_maintenance_window(&self, id: i64) -> Result<bool>;
}

/// Open the configured store
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn AlertStore>> {
    match &config.url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            info!("Using PostgreSQL alert store");
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured, using in-memory alert store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
