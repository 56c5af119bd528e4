//! Configuration management for Poolwatch
//!
//! Values are layered: built-in defaults, then an optional YAML/TOML file,
//! then `POOLWATCH__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "POOLWATCH";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Alerting configuration
    pub alerting: AlertingConfig,
}

impl Config {
    /// Load defaults, the optional file at `path`, then the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !Path::new(path).exists() {
                return Err(Error::config(format!("config file not found: {path}")));
            }
            builder = builder.add_source(config::File::from(Path::new(path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.alerting.check_interval.is_zero() {
            return Err(Error::config("alerting.check_interval must be greater than zero"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::config("database.max_connections must be greater than zero"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(Error::config(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }

        let mut names = std::collections::HashSet::new();
        for rule in &self.alerting.rules {
            if !names.insert(rule.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate rule '{}' in alerting.rules",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
    /// Prometheus exporter port; 0 disables the exporter
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            metrics_port: 9090,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; the in-memory store is used when unset
    pub url: Option<String>,
    /// Maximum connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Directory for daily-rolling log files
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Run the periodic sweep at all
    pub enabled: bool,
    /// Time between sweeps
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Minimum time between notifications for one open alert
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Samples older than this are ignored by sweeps
    #[serde(with = "humantime_serde")]
    pub sample_max_age: Duration,
    /// Rules seeded into the store at startup
    pub rules: Vec<RuleConfig>,
    /// Notification channels
    pub channels: ChannelsConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            sample_max_age: Duration::from_secs(300),
            rules: Vec::new(),
            channels: ChannelsConfig::default(),
        }
    }
}

/// A rule declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub condition: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_severity() -> String {
    "warning".to_string()
}

fn default_true() -> bool {
    true
}

/// Per-channel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub slack: SlackConfig,
    pub discord: DiscordConfig,
    /// Mattermost takes Slack-compatible webhooks
    pub mattermost: SlackConfig,
    pub webhook: WebhookConfig,
    pub email: EmailConfig,
    pub notion: NotionConfig,
    pub plugins: Vec<PluginConfig>,
}

/// Slack or Mattermost incoming webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub username: Option<String>,
}

/// Generic webhook receiving the plugin payload envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    /// HTTP method, POST when unset
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    /// STARTTLS on ports other than 465 (which always uses implicit TLS)
    pub use_tls: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            username: None,
            password: None,
            from: String::new(),
            to: Vec::new(),
            use_tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionConfig {
    pub enabled: bool,
    pub token: String,
    pub database_id: String,
    pub api_url: String,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            database_id: String::new(),
            api_url: "https://api.notion.com".to_string(),
        }
    }
}

/// Operator-defined HTTP plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Unique channel name
    pub name: String,
    pub enabled: bool,
    pub url: String,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    /// Time limit for one attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts, including the first
    pub retry_count: u32,
    /// Delay before the first retry; doubles after each failure
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            url: String::new(),
            method: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}
