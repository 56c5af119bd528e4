//! Connection-pool metric samples and the fields rules can reference

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One snapshot of a pool and its JVM, as delivered by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Monitored service
    pub target_name: String,

    /// Concrete endpoint of the service
    #[serde(default = "default_instance")]
    pub instance_name: String,

    /// Connections in use
    #[serde(default)]
    pub active: i64,

    /// Idle connections
    #[serde(default)]
    pub idle: i64,

    /// Threads waiting for a connection
    #[serde(default)]
    pub pending: i64,

    /// Maximum pool size
    #[serde(default)]
    pub max: i64,

    /// Connection acquisition timeouts
    #[serde(default)]
    pub timeout: i64,

    /// Heap in use (bytes)
    #[serde(default)]
    pub heap_used: i64,

    /// Maximum heap (bytes)
    #[serde(default)]
    pub heap_max: i64,

    /// Process CPU usage percentage
    #[serde(default)]
    pub cpu_usage: f64,

    /// When the sample was taken
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
}

fn default_instance() -> String {
    "default".to_string()
}

impl MetricSample {
    /// Create an empty sample for a target instance
    pub fn new(target_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            instance_name: instance_name.into(),
            active: 0,
            idle: 0,
            pending: 0,
            max: 0,
            timeout: 0,
            heap_used: 0,
            heap_max: 0,
            cpu_usage: 0.0,
            collected_at: Utc::now(),
        }
    }

    /// Pool usage percentage (0 when the pool size is unknown)
    pub fn usage(&self) -> f64 {
        percentage(self.active, self.max)
    }

    /// Heap usage percentage (0 when the heap size is unknown)
    pub fn heap_usage(&self) -> f64 {
        percentage(self.heap_used, self.heap_max)
    }

    /// Computed field set used by conditions and templates
    pub fn fields(&self) -> FieldValues {
        let mut values = FieldValues::default();
        values.set(Field::Active, self.active as f64);
        values.set(Field::Idle, self.idle as f64);
        values.set(Field::Pending, self.pending as f64);
        values.set(Field::Max, self.max as f64);
        values.set(Field::Usage, self.usage());
        values.set(Field::Timeout, self.timeout as f64);
        values.set(Field::HeapUsage, self.heap_usage());
        values.set(Field::CpuUsage, self.cpu_usage);
        values
    }
}

fn percentage(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Field a condition may compare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Active,
    Idle,
    Pending,
    Max,
    Usage,
    Timeout,
    HeapUsage,
    CpuUsage,
}

impl Field {
    /// Every field, in documentation order
    pub const ALL: [Field; 8] = [
        Field::Active,
        Field::Idle,
        Field::Pending,
        Field::Max,
        Field::Usage,
        Field::Timeout,
        Field::HeapUsage,
        Field::CpuUsage,
    ];

    /// Name used in conditions
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Active => "active",
            Field::Idle => "idle",
            Field::Pending => "pending",
            Field::Max => "max",
            Field::Usage => "usage",
            Field::Timeout => "timeout",
            Field::HeapUsage => "heap_usage",
            Field::CpuUsage => "cpu_usage",
        }
    }

    /// Name used as a message template placeholder
    pub fn placeholder(self) -> &'static str {
        match self {
            Field::Active => "Active",
            Field::Idle => "Idle",
            Field::Pending => "Pending",
            Field::Max => "Max",
            Field::Usage => "Usage",
            Field::Timeout => "Timeout",
            Field::HeapUsage => "HeapUsage",
            Field::CpuUsage => "CpuUsage",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or(())
    }
}

/// Computed field values; absent fields read as 0
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    values: HashMap<Field, f64>,
}

impl FieldValues {
    /// Build from `name -> value` pairs, ignoring unknown names
    pub fn from_named<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut values = Self::default();
        for (name, value) in pairs {
            if let Ok(field) = name.parse::<Field>() {
                values.set(field, value);
            }
        }
        values
    }

    /// Set one field
    pub fn set(&mut self, field: Field, value: f64) {
        self.values.insert(field, value);
    }

    /// Read one field, substituting 0 when missing
    pub fn get(&self, field: Field) -> f64 {
        self.values.get(&field).copied().unwrap_or(0.0)
    }
}
