//! # Poolwatch
//!
//! Alert rule engine and notification dispatcher for JVM connection-pool
//! monitoring.
//!
//! Poolwatch evaluates threshold rules such as `usage > 80` against pool
//! samples, tracks each alert from firing to resolution, honours maintenance
//! windows and delivers notifications to chat, email, Notion and HTTP plugins.
//!
//! ## Architecture
//!
//! - **Alerting**: condition parsing, lifecycle tracking, dispatch and the
//!   sweep loop
//! - **Channels**: Slack, Discord, Mattermost, webhook, email, Notion and plugins
//! - **Storage**: in-memory or PostgreSQL behind [`db::AlertStore`]
//! - **API**: REST API for rules, alerts, maintenance windows and samples
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a condition
//! poolwatch validate "usage > 80"
//!
//! # Run the engine and API
//! poolwatch --config poolwatch.yaml serve
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEvaluator, Condition, Notification, TestAlertRequest};
    pub use crate::channels::{Channel, ChannelRegistry};
    pub use crate::config::Config;
    pub use crate::db::{AlertStore, MemoryStore};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
