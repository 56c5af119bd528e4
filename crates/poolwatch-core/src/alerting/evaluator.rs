//! Alert rule evaluation engine
//!
//! [`AlertEvaluator`] owns the compiled rule set, the channel registry and the
//! latest sample per target instance. Samples are evaluated on every timer
//! sweep and again as soon as they are pushed; both paths share one
//! [`AlertTracker`], so each alert key sees a single state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::channels::ChannelRegistry;
use crate::config::{AlertingConfig, ChannelsConfig, RuleConfig};
use crate::db::AlertStore;
use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertRule, AlertRuleInput, AlertStatus, MaintenanceWindow, MaintenanceWindowInput,
    MetricSample, Severity,
};

use super::condition::Condition;
use super::maintenance::MaintenanceFilter;
use super::notifier::{Notification, NotificationDispatcher, TestAlertRequest, TestAlertResponse};
use super::tracker::{AlertTracker, AlertTransition};

/// Upper bound when scanning open alerts of one rule
const OPEN_ALERT_SCAN_LIMIT: usize = 10_000;

/// A stored rule with its condition parsed
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: AlertRule,
    pub condition: Condition,
}

/// Immutable snapshot of the enabled, parseable rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile stored rules, skipping disabled ones and logging broken conditions
    pub fn compile(rules: Vec<AlertRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match Condition::parse(&rule.condition) {
                Ok(condition) => Some(CompiledRule { rule, condition }),
                Err(e) => {
                    error!(rule = %rule.name, condition = %rule.condition, error = %e, "Skipping rule with invalid condition");
                    None
                }
            })
            .collect();

        Self { rules }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.rule.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Counters from one evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub samples: usize,
    pub evaluations: usize,
    pub transitions: usize,
    pub errors: usize,
}

impl SweepSummary {
    fn merge(mut self, other: SweepSummary) -> Self {
        self.samples += other.samples;
        self.evaluations += other.evaluations;
        self.transitions += other.transitions;
        self.errors += other.errors;
        self
    }
}

type SampleKey = (String, String);

/// Coordinates rule evaluation, lifecycle tracking and dispatch
pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    tracker: Arc<AlertTracker>,
    dispatcher: NotificationDispatcher,
    rules: RwLock<Arc<RuleSet>>,
    channels: RwLock<Arc<ChannelRegistry>>,
    maintenance: RwLock<Arc<MaintenanceFilter>>,
    samples: DashMap<SampleKey, MetricSample>,
    deliveries: TaskTracker,
    check_interval: Duration,
    sample_max_age: chrono::Duration,
}

impl AlertEvaluator {
    /// Create an evaluator; call [`AlertEvaluator::reload_rules`] before use
    pub fn new(store: Arc<dyn AlertStore>, config: &AlertingConfig, channels: ChannelRegistry) -> Self {
        Self {
            tracker: Arc::new(AlertTracker::new(store.clone(), config.cooldown)),
            store,
            dispatcher: NotificationDispatcher::new(),
            rules: RwLock::new(Arc::new(RuleSet::default())),
            channels: RwLock::new(Arc::new(channels)),
            maintenance: RwLock::new(Arc::new(MaintenanceFilter::default())),
            samples: DashMap::new(),
            deliveries: TaskTracker::new(),
            check_interval: config.check_interval,
            sample_max_age: chrono::Duration::from_std(config.sample_max_age)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Current rule snapshot
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    /// Current channel snapshot
    pub fn channels(&self) -> Arc<ChannelRegistry> {
        self.channels.read().clone()
    }

    /// Run sweeps every `check_interval` until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) {
        info!(interval = ?self.check_interval, "Starting alert evaluator");

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_sweep().await {
                        Ok(summary) => debug!(
                            samples = summary.samples,
                            evaluations = summary.evaluations,
                            transitions = summary.transitions,
                            errors = summary.errors,
                            "Alert sweep complete"
                        ),
                        Err(e) => warn!(error = %e, "Alert sweep skipped"),
                    }
                }
            }
        }

        self.wait_for_deliveries().await;
        info!("Alert evaluator stopped");
    }

    /// Re-read rules and windows, then evaluate every fresh cached sample
    pub async fn run_sweep(&self) -> Result<SweepSummary> {
        metrics::counter!("poolwatch_sweeps_total").increment(1);

        self.reload_rules().await?;
        let filter = self.maintenance.read().clone();
        let rules = self.rules();
        let registry = self.channels();

        let now = Utc::now();
        self.prune_samples(now);
        let samples: Vec<MetricSample> = self.samples.iter().map(|e| e.value().clone()).collect();

        let summaries = join_all(
            samples
                .iter()
                .map(|sample| self.evaluate_sample(sample, &rules, &filter, &registry, now)),
        )
        .await;

        Ok(summaries
            .into_iter()
            .fold(SweepSummary::default(), SweepSummary::merge))
    }

    /// Cache a pushed sample and evaluate it right away
    pub async fn record_sample(&self, sample: MetricSample) -> Result<SweepSummary> {
        if sample.target_name.trim().is_empty() {
            return Err(Error::validation("sample target_name must not be empty"));
        }

        let now = Utc::now();
        self.prune_samples(now);
        let key = (sample.target_name.clone(), sample.instance_name.clone());
        self.samples.insert(key, sample.clone());

        let rules = self.rules();
        let filter = self.maintenance.read().clone();
        let registry = self.channels();

        Ok(self
            .evaluate_sample(&sample, &rules, &filter, &registry, now)
            .await)
    }

    fn prune_samples(&self, now: DateTime<Utc>) {
        let cutoff = now - self.sample_max_age;
        self.samples.retain(|_, sample| sample.collected_at >= cutoff);
    }

    /// Number of cached samples
    pub fn cached_samples(&self) -> usize {
        self.samples.len()
    }

    async fn evaluate_sample(
        &self,
        sample: &MetricSample,
        rules: &RuleSet,
        filter: &MaintenanceFilter,
        registry: &Arc<ChannelRegistry>,
        now: DateTime<Utc>,
    ) -> SweepSummary {
        let fields = sample.fields();
        let suppressed = filter.is_suppressed(&sample.target_name, now);
        let mut summary = SweepSummary {
            samples: 1,
            ..SweepSummary::default()
        };

        for compiled in rules.rules() {
            let breached = compiled.condition.evaluate(&fields);
            summary.evaluations += 1;

            match self
                .tracker
                .observe(&compiled.rule, sample, breached, suppressed, now)
                .await
            {
                Ok(Some(transition)) => {
                    summary.transitions += 1;
                    self.spawn_dispatch(transition, registry.clone());
                }
                Ok(None) => {}
                Err(e) => {
                    summary.errors += 1;
                    error!(
                        rule = %compiled.rule.name,
                        target = %sample.target_name,
                        instance = %sample.instance_name,
                        error = %e,
                        "Failed to apply alert transition"
                    );
                }
            }
        }

        summary
    }

    fn spawn_dispatch(&self, transition: AlertTransition, registry: Arc<ChannelRegistry>) {
        let tracker = self.tracker.clone();
        let dispatcher = self.dispatcher.clone();

        self.deliveries.spawn(async move {
            let alert_id = transition.alert.id;
            let notification = Notification::new(transition.alert, transition.transition);
            let report = dispatcher.dispatch(&notification, &registry).await;

            if let Err(e) = tracker
                .record_delivery(alert_id, &report.results, Utc::now())
                .await
            {
                error!(alert_id, error = %e, "Failed to record notification delivery");
            }
        });
    }

    /// Wait until every in-flight dispatch has finished
    pub async fn wait_for_deliveries(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    /// Swap in a freshly compiled rule set and maintenance filter from the store
    pub async fn reload_rules(&self) -> Result<usize> {
        let rules = RuleSet::compile(self.store.get_alert_rules().await?);
        let windows = self.refresh_maintenance().await?;
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);

        debug!(count, windows = windows.len(), "Alert rules reloaded");
        Ok(count)
    }

    /// Rebuild the channel registry from configuration
    pub fn reload_channels(&self, config: &ChannelsConfig) -> Result<usize> {
        let registry = ChannelRegistry::from_config(config)?;
        let count = registry.len();
        *self.channels.write() = Arc::new(registry);

        info!(count, "Notification channels reloaded");
        Ok(count)
    }

    async fn refresh_maintenance(&self) -> Result<Arc<MaintenanceFilter>> {
        let windows = self.store.get_all_maintenance_windows().await?;
        let filter = Arc::new(MaintenanceFilter::new(windows));
        *self.maintenance.write() = filter.clone();
        Ok(filter)
    }

    /// Parse a condition without storing anything
    pub fn validate_condition(&self, condition: &str) -> Result<Condition> {
        Ok(Condition::parse(condition)?)
    }

    // --- Rules ---

    pub async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        self.store.get_alert_rules().await
    }

    pub async fn get_rule(&self, id: i64) -> Result<AlertRule> {
        self.store
            .get_alert_rule(id)
            .await?
            .ok_or_else(|| Error::not_found("alert rule", id))
    }

    /// Validate and store a new rule
    pub async fn create_rule(&self, input: AlertRuleInput) -> Result<AlertRule> {
        let rule = self.insert_rule(input).await?;
        self.reload_rules().await?;
        Ok(rule)
    }

    async fn insert_rule(&self, input: AlertRuleInput) -> Result<AlertRule> {
        let (name, severity) = validate_rule_input(&input)?;
        if self.store.get_alert_rule_by_name(&name).await?.is_some() {
            return Err(Error::validation(format!("alert rule '{name}' already exists")));
        }

        let now = Utc::now();
        let mut rule = AlertRule {
            id: 0,
            name,
            condition: input.condition.trim().to_string(),
            severity,
            message: input.message,
            enabled: input.enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        rule.id = self.store.save_alert_rule(&rule).await?;

        info!(rule = %rule.name, condition = %rule.condition, "Alert rule created");
        Ok(rule)
    }

    /// Replace a rule's definition
    pub async fn update_rule(&self, id: i64, input: AlertRuleInput) -> Result<AlertRule> {
        let existing = self.get_rule(id).await?;
        let (name, severity) = validate_rule_input(&input)?;

        if name != existing.name && self.store.get_alert_rule_by_name(&name).await?.is_some() {
            return Err(Error::validation(format!("alert rule '{name}' already exists")));
        }

        let rule = AlertRule {
            id,
            name,
            condition: input.condition.trim().to_string(),
            severity,
            message: input.message,
            enabled: input.enabled.unwrap_or(existing.enabled),
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        if !self.store.update_alert_rule(&rule).await? {
            return Err(Error::not_found("alert rule", id));
        }

        if rule.name != existing.name {
            self.resolve_rule_alerts(&existing.name).await?;
        }
        self.reload_rules().await?;

        info!(rule = %rule.name, "Alert rule updated");
        Ok(rule)
    }

    /// Delete a rule and close its open alerts
    pub async fn delete_rule(&self, id: i64) -> Result<()> {
        let existing = self.get_rule(id).await?;
        if !self.store.delete_alert_rule(id).await? {
            return Err(Error::not_found("alert rule", id));
        }

        self.resolve_rule_alerts(&existing.name).await?;
        self.reload_rules().await?;

        info!(rule = %existing.name, "Alert rule deleted");
        Ok(())
    }

    /// Enable or disable a rule
    pub async fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<AlertRule> {
        let mut rule = self.get_rule(id).await?;
        rule.enabled = enabled;
        rule.updated_at = Utc::now();

        if !self.store.update_alert_rule(&rule).await? {
            return Err(Error::not_found("alert rule", id));
        }
        self.reload_rules().await?;

        info!(rule = %rule.name, enabled, "Alert rule toggled");
        Ok(rule)
    }

    /// Insert config-file rules that are not stored yet
    pub async fn seed_rules(&self, rules: &[RuleConfig]) -> Result<usize> {
        let mut created = 0;
        for rule in rules {
            if self.store.get_alert_rule_by_name(&rule.name).await?.is_some() {
                debug!(rule = %rule.name, "Rule already stored, not seeding");
                continue;
            }

            self.insert_rule(AlertRuleInput {
                name: rule.name.clone(),
                condition: rule.condition.clone(),
                severity: rule.severity.clone(),
                message: rule.message.clone(),
                enabled: Some(rule.enabled),
            })
            .await
            .map_err(|e| Error::config(format!("rule '{}': {e}", rule.name)))?;
            created += 1;
        }

        self.reload_rules().await?;
        Ok(created)
    }

    async fn resolve_rule_alerts(&self, rule_name: &str) -> Result<()> {
        let open = self
            .store
            .list_alerts(Some(AlertStatus::Fired), OPEN_ALERT_SCAN_LIMIT)
            .await?;

        for alert in open.into_iter().filter(|a| a.rule_name == rule_name) {
            self.resolve_alert(alert.id).await?;
        }
        Ok(())
    }

    // --- Alerts ---

    pub async fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>> {
        self.store.list_alerts(status, limit).await
    }

    /// Resolve an alert by hand; resolving a resolved alert returns it unchanged
    pub async fn resolve_alert(&self, id: i64) -> Result<Alert> {
        match self.tracker.resolve_manually(id, Utc::now()).await? {
            Some(transition) => {
                let alert = transition.alert.clone();
                self.spawn_dispatch(transition, self.channels());
                Ok(alert)
            }
            None => self
                .store
                .get_alert(id)
                .await?
                .ok_or_else(|| Error::not_found("alert", id)),
        }
    }

    /// Send a synthetic alert to the requested channels
    pub async fn send_test_alert(&self, request: &TestAlertRequest) -> Result<TestAlertResponse> {
        let registry = self.channels();
        self.dispatcher.send_test(request, &registry).await
    }

    // --- Maintenance windows ---

    pub async fn list_windows(&self) -> Result<Vec<MaintenanceWindow>> {
        self.store.get_all_maintenance_windows().await
    }

    pub async fn create_window(&self, input: MaintenanceWindowInput) -> Result<MaintenanceWindow> {
        input.validate()?;

        let mut window = input.into_window(0);
        window.id = self.store.save_maintenance_window(&window).await?;
        self.refresh_maintenance().await?;

        info!(
            window = %window.name,
            target = %window.target_name,
            recurring = window.recurring,
            "Maintenance window created"
        );
        Ok(window)
    }

    pub async fn delete_window(&self, id: i64) -> Result<()> {
        if !self.store.delete_maintenance_window(id).await? {
            return Err(Error::not_found("maintenance window", id));
        }
        self.refresh_maintenance().await?;
        Ok(())
    }
}

fn validate_rule_input(input: &AlertRuleInput) -> Result<(String, Severity)> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(Error::validation("rule name must not be empty"));
    }
    Condition::parse(&input.condition)?;
    let severity = input.severity.parse::<Severity>()?;
    Ok((name.to_string(), severity))
}
