//! Data models for Poolwatch

mod alert;
mod metrics;

pub use alert::*;
pub use metrics::*;
