//! PostgreSQL alert store

use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{Error, Result};
use crate::models::{Alert, AlertKey, AlertRule, AlertStatus, MaintenanceWindow, Severity};

use super::AlertStore;

const UNIQUE_VIOLATION: &str = "23505";

/// Store for rules, alerts and maintenance windows in PostgreSQL
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return Error::validation(what());
        }
    }
    Error::Database(err)
}

#[async_trait]
impl AlertStore for PostgresStore {
    // --- Alerts ---

    async fn save_alert(&self, alert: &Alert) -> Result<i64> {
        let channels = serde_json::to_value(&alert.channels)?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO alerts (
                target_name, instance_name, rule_name, severity, message,
                status, fired_at, resolved_at, notified_at, channels
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&alert.target_name)
        .bind(&alert.instance_name)
        .bind(&alert.rule_name)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.status.as_str())
        .bind(alert.fired_at)
        .bind(alert.resolved_at)
        .bind(alert.notified_at)
        .bind(&channels)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(e, || format!("an open alert already exists for {}", alert.key()))
        })?;

        Ok(id)
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let channels = serde_json::to_value(&alert.channels)?;

        let result = sqlx::query(
            r#"
            UPDATE alerts SET
                severity = $2,
                message = $3,
                status = $4,
                resolved_at = $5,
                notified_at = $6,
                channels = $7
            WHERE id = $1
            "#,
        )
        .bind(alert.id)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.status.as_str())
        .bind(alert.resolved_at)
        .bind(alert.notified_at)
        .bind(&channels)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("alert", alert.id));
        }

        Ok(())
    }

    async fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn get_active_alert_by_key(&self, key: &AlertKey) -> Result<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            WHERE target_name = $1 AND instance_name = $2 AND rule_name = $3
              AND status = 'fired'
            ORDER BY fired_at DESC
            LIMIT 1
            "#,
        )
        .bind(&key.target_name)
        .bind(&key.instance_name)
        .bind(&key.rule_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(AlertStatus::as_str))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // --- Alert Rules ---

    async fn get_alert_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_alert_rule(&self, id: i64) -> Result<Option<AlertRule>> {
        let row = sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn get_alert_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        let row = sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO alert_rules (name, condition, severity, message, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.condition)
        .bind(rule.severity.as_str())
        .bind(&rule.message)
        .bind(rule.enabled)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, || format!("rule name '{}' already exists", rule.name)))?;

        Ok(id)
    }

    async fn update_alert_rule(&self, rule: &AlertRule) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alert_rules SET
                name = $2,
                condition = $3,
                severity = $4,
                message = $5,
                enabled = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.condition)
        .bind(rule.severity.as_str())
        .bind(&rule.message)
        .bind(rule.enabled)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, || format!("rule name '{}' already exists", rule.name)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_alert_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- Maintenance Windows ---

    async fn get_all_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>> {
        let rows = sqlx::query_as::<_, MaintenanceWindowRow>(
            "SELECT * FROM maintenance_windows ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_maintenance_window(&self, window: &MaintenanceWindow) -> Result<i64> {
        let days = serde_json::to_value(&window.days_of_week)?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO maintenance_windows (
                name, description, target_name, start_time, end_time, recurring, days_of_week
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&window.name)
        .bind(&window.description)
        .bind(&window.target_name)
        .bind(window.start_time)
        .bind(window.end_time)
        .bind(window.recurring)
        .bind(&days)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn delete_maintenance_window(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM maintenance_windows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// Database row types for mapping

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    target_name: String,
    instance_name: String,
    rule_name: String,
    severity: String,
    message: String,
    status: String,
    fired_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    notified_at: Option<DateTime<Utc>>,
    channels: serde_json::Value,
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Alert {
            id: row.id,
            target_name: row.target_name,
            instance_name: row.instance_name,
            rule_name: row.rule_name,
            severity: row.severity.parse().unwrap_or_default(),
            message: row.message,
            status: row.status.parse().unwrap_or_default(),
            fired_at: row.fired_at,
            resolved_at: row.resolved_at,
            notified_at: row.notified_at,
            channels: serde_json::from_value(row.channels).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRuleRow {
    id: i64,
    name: String,
    condition: String,
    severity: String,
    message: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AlertRuleRow> for AlertRule {
    fn from(row: AlertRuleRow) -> Self {
        AlertRule {
            id: row.id,
            name: row.name,
            condition: row.condition,
            severity: row.severity.parse::<Severity>().unwrap_or_default(),
            message: row.message,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MaintenanceWindowRow {
    id: i64,
    name: String,
    description: Option<String>,
    target_name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    recurring: bool,
    days_of_week: serde_json::Value,
}

impl From<MaintenanceWindowRow> for MaintenanceWindow {
    fn from(row: MaintenanceWindowRow) -> Self {
        let days_of_week: Vec<Weekday> =
            serde_json::from_value(row.days_of_week).unwrap_or_default();

        MaintenanceWindow {
            id: row.id,
            name: row.name,
            description: row.description,
            target_name: row.target_name,
            start_time: row.start_time,
            end_time: row.end_time,
            recurring: row.recurring,
            days_of_week,
        }
    }
}
