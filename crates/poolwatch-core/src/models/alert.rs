//! Alert data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase name used in configs, payloads and storage
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::validation(format!(
                "invalid severity '{other}' (expected info, warning or critical)"
            ))),
        }
    }
}

/// Status of an alert record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition is currently breached
    #[default]
    Fired,
    /// Condition cleared or an operator closed the alert
    Resolved,
}

impl AlertStatus {
    /// Lowercase name used in payloads and storage
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Fired => "fired",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fired" => Ok(AlertStatus::Fired),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(Error::validation(format!("invalid alert status '{other}'"))),
        }
    }
}

/// An alert rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: i64,

    /// Unique, human-readable name
    pub name: String,

    /// Predicate such as `usage > 80`
    pub condition: String,

    /// Alert severity
    pub severity: Severity,

    /// Message template, e.g. `Pool usage is high: {{Usage}}%`
    pub message: String,

    /// Whether the rule is evaluated at all
    pub enabled: bool,

    /// When the rule was created
    pub created_at: DateTime<Utc>,

    /// When the rule was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing an alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleInput {
    pub name: String,
    pub condition: String,
    pub severity: String,
    pub message: String,
    pub enabled: Option<bool>,
}

/// Identity of one alert lifecycle: a rule applied to one instance of one target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub target_name: String,
    pub instance_name: String,
    pub rule_name: String,
}

impl AlertKey {
    /// Build a key from its parts
    pub fn new(
        target_name: impl Into<String>,
        instance_name: impl Into<String>,
        rule_name: impl Into<String>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            instance_name: instance_name.into(),
            rule_name: rule_name.into(),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.target_name, self.instance_name, self.rule_name
        )
    }
}

/// One firing episode of a rule for a target instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier (0 until the store assigns one)
    pub id: i64,

    /// Monitored service
    pub target_name: String,

    /// Concrete endpoint of the service
    pub instance_name: String,

    /// Rule that fired
    pub rule_name: String,

    /// Severity copied from the rule at fire time
    pub severity: Severity,

    /// Rendered message
    pub message: String,

    /// Current status
    pub status: AlertStatus,

    /// When the alert fired
    pub fired_at: DateTime<Utc>,

    /// When the alert was resolved (if resolved)
    pub resolved_at: Option<DateTime<Utc>>,

    /// Last notification attempt time
    pub notified_at: Option<DateTime<Utc>>,

    /// Channels that accepted at least one notification for this alert
    pub channels: Vec<String>,
}

impl Alert {
    /// Lifecycle key of this alert
    pub fn key(&self) -> AlertKey {
        AlertKey::new(&self.target_name, &self.instance_name, &self.rule_name)
    }

    /// Whether the alert is still open
    pub fn is_fired(&self) -> bool {
        self.status == AlertStatus::Fired
    }

    /// Merge delivered channel names, keeping the list sorted and unique
    pub fn add_channels<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels.extend(names.into_iter().map(Into::into));
        self.channels.sort();
        self.channels.dedup();
    }
}

/// A scheduled period during which new alerts are not raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Empty means the window applies to every target
    #[serde(default)]
    pub target_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub recurring: bool,
    /// Weekdays on which a recurring window applies
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
}

/// Input for creating a maintenance window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindowInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
}

impl MaintenanceWindowInput {
    /// Check the window is well formed
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("maintenance window name must not be empty"));
        }
        if self.recurring {
            if self.days_of_week.is_empty() {
                return Err(Error::validation(
                    "recurring maintenance window needs at least one weekday",
                ));
            }
        } else if self.end_time <= self.start_time {
            return Err(Error::validation(
                "maintenance window end_time must be after start_time",
            ));
        }
        Ok(())
    }

    /// Materialize into a window with the given id
    pub fn into_window(self, id: i64) -> MaintenanceWindow {
        MaintenanceWindow {
            id,
            name: self.name,
            description: self.description,
            target_name: self.target_name,
            start_time: self.start_time,
            end_time: self.end_time,
            recurring: self.recurring,
            days_of_week: self.days_of_week,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("Critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(" info ".parse::<Severity>().unwrap(), Severity::Info);
        assert!("urgent".parse::<Severity>().unwrap_err().is_validation());
    }

    #[test]
    fn add_channels_dedups() {
        let mut alert = Alert {
            id: 1,
            target_name: "user-service".to_string(),
            instance_name: "default".to_string(),
            rule_name: "high_usage".to_string(),
            severity: Severity::Warning,
            message: String::new(),
            status: AlertStatus::Fired,
            fired_at: Utc::now(),
            resolved_at: None,
            notified_at: None,
            channels: vec!["slack".to_string()],
        };

        alert.add_channels(["slack", "discord"]);

        assert_eq!(alert.channels, vec!["discord", "slack"]);
        assert_eq!(alert.key().to_string(), "user-service/default/high_usage");
    }

    #[test]
    fn window_input_validation() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let mut input = MaintenanceWindowInput {
            name: "nightly".to_string(),
            description: None,
            target_name: String::new(),
            start_time: start,
            end_time: start - Duration::hours(1),
            recurring: false,
            days_of_week: vec![],
        };
        assert!(input.validate().is_err());

        input.end_time = start + Duration::hours(1);
        assert!(input.validate().is_ok());

        input.recurring = true;
        assert!(input.validate().is_err());

        input.days_of_week = vec![Weekday::Sun];
        assert!(input.validate().is_ok());
    }
}
