//! Alerting engine for Poolwatch
//!
//! Evaluates pool-health conditions, tracks the alert lifecycle, honours
//! maintenance windows and fans notifications out to the configured channels.

pub mod condition;
mod evaluator;
mod maintenance;
mod notifier;
mod template;
mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use condition::{Condition, ConditionError, Operator};
pub use evaluator::{AlertEvaluator, CompiledRule, RuleSet, SweepSummary};
pub use maintenance::MaintenanceFilter;
pub use notifier::{
    DispatchReport, Notification, NotificationDispatcher, NotificationResult, TestAlertRequest,
    TestAlertResponse,
};
pub use template::{format_number, render_message, TemplateContext};
pub use tracker::{AlertTracker, AlertTransition, Transition};
