//! Monitor, detect, remediate control loop
//!
//! Monitors are polled in registration order once per cycle. A detected issue
//! is recorded and handed to the remediation registered for its type, and the
//! outcome is written back onto the issue. Monitor and remediation calls each
//! run in their own task: an error or a panic is reported as a
//! [`HealingFault`] alert and the cycle moves on to the next monitor.

mod integration;
mod r#loop;

pub use integration::{HealingIntegration, ResourceStateMonitor, TrendForecastMonitor};
pub use r#loop::HealingConfig;

use crate::error::HealingFault;
use crate::models::Severity;
use crate::ticker::LoopHandle;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use r#loop::CycleLoop;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Invoked once per cycle with cumulative counters
pub type MetricsCallback = Arc<dyn Fn(&HealingMetrics) + Send + Sync>;

/// Invoked for every isolated monitor or remediation fault
pub type AlertCallback = Arc<dyn Fn(&HealingFault) + Send + Sync>;

/// Invoked when an issue is recorded, before remediation
pub type IssueCallback = Arc<dyn Fn(&Issue) + Send + Sync>;

/// Invoked after every remediation attempt, faulted ones included
pub type ActionCallback = Arc<dyn Fn(&RemediationAction) + Send + Sync>;

/// Issue payload reported by a monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedIssue {
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub metrics: BTreeMap<String, f64>,
}

impl DetectedIssue {
    pub fn new(
        issue_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            issue_type: issue_type.into(),
            severity,
            description: description.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Result of a single monitor check
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorResult {
    Healthy,
    Detected(DetectedIssue),
}

/// What a remediation reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationOutcome {
    pub success: bool,
    pub description: String,
}

impl RemediationOutcome {
    pub fn succeeded(description: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
        }
    }
}

/// A check polled once per healing cycle
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` is reserved for unexpected faults; a problem found by the check
    /// is reported as [`MonitorResult::Detected`].
    async fn check(&self) -> Result<MonitorResult>;
}

/// Corrective action for one issue type
#[async_trait]
pub trait Remediation: Send + Sync {
    fn name(&self) -> &str;

    async fn remediate(&self, issue: &Issue) -> Result<RemediationOutcome>;
}

/// Adapts a synchronous closure into a [`HealthMonitor`]
pub struct FnMonitor<F> {
    name: String,
    check: F,
}

impl<F> FnMonitor<F>
where
    F: Fn() -> Result<MonitorResult> + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

#[async_trait]
impl<F> HealthMonitor for FnMonitor<F>
where
    F: Fn() -> Result<MonitorResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<MonitorResult> {
        (self.check)()
    }
}

/// Adapts a synchronous closure into a [`Remediation`]
pub struct FnRemediation<F> {
    name: String,
    action: F,
}

impl<F> FnRemediation<F>
where
    F: Fn(&Issue) -> Result<RemediationOutcome> + Send + Sync,
{
    pub fn new(name: impl Into<String>, action: F) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

#[async_trait]
impl<F> Remediation for FnRemediation<F>
where
    F: Fn(&Issue) -> Result<RemediationOutcome> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn remediate(&self, issue: &Issue) -> Result<RemediationOutcome> {
        (self.action)(issue)
    }
}

/// A recorded detection, back-filled once remediation has run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub id: u64,
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub remediation_attempted: bool,
    pub remediation_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationAction {
    pub issue_id: u64,
    pub issue_type: String,
    pub action: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub details: String,
}

/// Cumulative loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealingMetrics {
    pub cycles: u64,
    pub issues_detected: u64,
    pub remediations: u64,
    pub successful_remediations: u64,
    pub failed_remediations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueSummary {
    pub total_issues: usize,
    pub unresolved: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Issue types seen without a registered remediation
    pub unhandled_types: Vec<String>,
    pub recent: Vec<Issue>,
}

const RECENT_ISSUES: usize = 10;

/// State shared between the loop handle and its cycle task
pub(crate) struct HealingShared {
    config: HealingConfig,
    monitors: RwLock<Vec<Arc<dyn HealthMonitor>>>,
    remediations: RwLock<HashMap<String, Arc<dyn Remediation>>>,
    issues: RwLock<VecDeque<Issue>>,
    actions: RwLock<VecDeque<RemediationAction>>,
    metrics: Mutex<HealingMetrics>,
    metrics_callbacks: RwLock<Vec<MetricsCallback>>,
    alert_callbacks: RwLock<Vec<AlertCallback>>,
    issue_callbacks: RwLock<Vec<IssueCallback>>,
    action_callbacks: RwLock<Vec<ActionCallback>>,
    next_issue_id: AtomicU64,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl HealingShared {
    fn new(config: HealingConfig) -> Self {
        Self {
            config,
            monitors: RwLock::new(Vec::new()),
            remediations: RwLock::new(HashMap::new()),
            issues: RwLock::new(VecDeque::new()),
            actions: RwLock::new(VecDeque::new()),
            metrics: Mutex::new(HealingMetrics::default()),
            metrics_callbacks: RwLock::new(Vec::new()),
            alert_callbacks: RwLock::new(Vec::new()),
            issue_callbacks: RwLock::new(Vec::new()),
            action_callbacks: RwLock::new(Vec::new()),
            next_issue_id: AtomicU64::new(1),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// One full pass over all monitors. Cycles never overlap.
    pub(crate) async fn run_cycle(&self) -> Vec<RemediationAction> {
        let _guard = self.cycle_lock.lock().await;

        let monitors = self.monitors.read().clone();
        let mut actions = Vec::new();

        for monitor in monitors {
            let name = monitor.name().to_string();
            let task = tokio::spawn(async move { monitor.check().await });

            let detected = match task.await {
                Ok(Ok(MonitorResult::Healthy)) => continue,
                Ok(Ok(MonitorResult::Detected(detected))) => detected,
                Ok(Err(e)) => {
                    self.raise(HealingFault::MonitorFault {
                        monitor: name,
                        message: format!("{:#}", e),
                    });
                    continue;
                }
                Err(e) => {
                    self.raise(HealingFault::MonitorFault {
                        monitor: name,
                        message: panic_message(e),
                    });
                    continue;
                }
            };

            let issue = self.record_issue(detected);
            if let Some(action) = self.remediate(issue).await {
                actions.push(action);
            }
        }

        let snapshot = {
            let mut metrics = self.metrics.lock();
            metrics.cycles += 1;
            *metrics
        };

        debug!(
            cycle = snapshot.cycles,
            actions = actions.len(),
            "Healing cycle complete"
        );

        let callbacks = self.metrics_callbacks.read().clone();
        for callback in callbacks {
            callback(&snapshot);
        }

        actions
    }

    fn record_issue(&self, detected: DetectedIssue) -> Issue {
        let issue = Issue {
            id: self.next_issue_id.fetch_add(1, Ordering::Relaxed),
            issue_type: detected.issue_type,
            severity: detected.severity,
            description: detected.description,
            detected_at: Utc::now(),
            metrics: detected.metrics,
            remediation_attempted: false,
            remediation_successful: false,
            remediation_details: None,
        };

        match issue.severity {
            Severity::Critical => warn!(
                issue_id = issue.id,
                issue_type = %issue.issue_type,
                severity = %issue.severity,
                "Issue detected: {}",
                issue.description
            ),
            _ => info!(
                issue_id = issue.id,
                issue_type = %issue.issue_type,
                severity = %issue.severity,
                "Issue detected: {}",
                issue.description
            ),
        }

        push_bounded(&self.issues, issue.clone(), self.config.history_capacity);
        self.metrics.lock().issues_detected += 1;

        let callbacks = self.issue_callbacks.read().clone();
        for callback in callbacks {
            callback(&issue);
        }
        issue
    }

    async fn remediate(&self, issue: Issue) -> Option<RemediationAction> {
        let remediation = self.remediations.read().get(&issue.issue_type).cloned();
        let Some(remediation) = remediation else {
            info!(
                issue_id = issue.id,
                issue_type = %issue.issue_type,
                "No remediation registered, leaving issue unresolved"
            );
            return None;
        };

        let action_name = remediation.name().to_string();
        let task_issue = issue.clone();
        let task = tokio::spawn(async move { remediation.remediate(&task_issue).await });

        let (success, details) = match task.await {
            Ok(Ok(outcome)) => (outcome.success, outcome.description),
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                self.raise(HealingFault::RemediationFault {
                    issue_type: issue.issue_type.clone(),
                    message: message.clone(),
                });
                (false, message)
            }
            Err(e) => {
                let message = panic_message(e);
                self.raise(HealingFault::RemediationFault {
                    issue_type: issue.issue_type.clone(),
                    message: message.clone(),
                });
                (false, message)
            }
        };

        {
            let mut metrics = self.metrics.lock();
            metrics.remediations += 1;
            if success {
                metrics.successful_remediations += 1;
            } else {
                metrics.failed_remediations += 1;
            }
        }

        let action = RemediationAction {
            issue_id: issue.id,
            issue_type: issue.issue_type.clone(),
            action: action_name,
            executed_at: Utc::now(),
            success,
            details,
        };

        if success {
            info!(
                issue_id = issue.id,
                action = %action.action,
                "Remediation succeeded: {}",
                action.details
            );
        } else {
            warn!(
                issue_id = issue.id,
                action = %action.action,
                "Remediation failed: {}",
                action.details
            );
        }

        if let Some(recorded) = self
            .issues
            .write()
            .iter_mut()
            .rev()
            .find(|i| i.id == issue.id)
        {
            recorded.remediation_attempted = true;
            recorded.remediation_successful = success;
            recorded.remediation_details = Some(action.details.clone());
        }

        push_bounded(&self.actions, action.clone(), self.config.history_capacity);

        let callbacks = self.action_callbacks.read().clone();
        for callback in callbacks {
            callback(&action);
        }
        Some(action)
    }

    fn raise(&self, fault: HealingFault) {
        error!(source = %fault.source_name(), error = %fault, "Healing fault isolated");

        let callbacks = self.alert_callbacks.read().clone();
        for callback in callbacks {
            callback(&fault);
        }
    }
}

fn push_bounded<T>(history: &RwLock<VecDeque<T>>, item: T, capacity: usize) {
    let mut history = history.write();
    history.push_back(item);
    while history.len() > capacity {
        history.pop_front();
    }
}

fn tail<T: Clone>(history: &RwLock<VecDeque<T>>, limit: usize) -> Vec<T> {
    let history = history.read();
    let skip = history.len().saturating_sub(limit);
    history.iter().skip(skip).cloned().collect()
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }

    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Periodic self-healing driver
pub struct HealingLoop {
    shared: Arc<HealingShared>,
    runner: tokio::sync::Mutex<Option<LoopHandle>>,
}

impl HealingLoop {
    pub fn new(config: HealingConfig) -> Self {
        Self {
            shared: Arc::new(HealingShared::new(config)),
            runner: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealingConfig {
        &self.shared.config
    }

    pub fn register_monitor<M>(&self, monitor: M)
    where
        M: HealthMonitor + 'static,
    {
        debug!(monitor = %monitor.name(), "Registering health monitor");
        self.shared.monitors.write().push(Arc::new(monitor));
    }

    pub fn register_monitor_fn<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Result<MonitorResult> + Send + Sync + 'static,
    {
        self.register_monitor(FnMonitor::new(name, check));
    }

    /// Register the remediation for `issue_type`, replacing any previous one
    pub fn register_remediation<R>(&self, issue_type: impl Into<String>, remediation: R)
    where
        R: Remediation + 'static,
    {
        let issue_type = issue_type.into();
        debug!(issue_type = %issue_type, action = %remediation.name(), "Registering remediation");
        self.shared
            .remediations
            .write()
            .insert(issue_type, Arc::new(remediation));
    }

    pub fn register_remediation_fn<F>(
        &self,
        issue_type: impl Into<String>,
        name: impl Into<String>,
        action: F,
    ) where
        F: Fn(&Issue) -> Result<RemediationOutcome> + Send + Sync + 'static,
    {
        self.register_remediation(issue_type, FnRemediation::new(name, action));
    }

    pub fn on_metrics<F>(&self, callback: F)
    where
        F: Fn(&HealingMetrics) + Send + Sync + 'static,
    {
        self.shared.metrics_callbacks.write().push(Arc::new(callback));
    }

    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&HealingFault) + Send + Sync + 'static,
    {
        self.shared.alert_callbacks.write().push(Arc::new(callback));
    }

    pub fn on_issue<F>(&self, callback: F)
    where
        F: Fn(&Issue) + Send + Sync + 'static,
    {
        self.shared.issue_callbacks.write().push(Arc::new(callback));
    }

    pub fn on_action<F>(&self, callback: F)
    where
        F: Fn(&RemediationAction) + Send + Sync + 'static,
    {
        self.shared.action_callbacks.write().push(Arc::new(callback));
    }

    pub fn monitor_count(&self) -> usize {
        self.shared.monitors.read().len()
    }

    pub fn remediation_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.shared.remediations.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Run one cycle now, returning the actions taken
    pub async fn run_cycle(&self) -> Vec<RemediationAction> {
        self.shared.run_cycle().await
    }

    /// Start cycling at the configured interval
    pub async fn start(&self) {
        self.start_every(self.shared.config.cycle_interval).await;
    }

    pub async fn start_every(&self, interval: Duration) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("Healing loop already running");
            return;
        }

        let cycles = CycleLoop::new(self.shared.clone(), interval);
        *runner = Some(LoopHandle::spawn("healing_loop", |shutdown| {
            cycles.run(shutdown)
        }));
    }

    /// Stop the loop, waiting for an in-flight cycle to finish
    pub async fn stop(&self) {
        let handle = self.runner.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown(self.shared.config.stop_timeout).await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    pub fn metrics(&self) -> HealingMetrics {
        *self.shared.metrics.lock()
    }

    /// Most recent `limit` issues, oldest first
    pub fn issue_history(&self, limit: usize) -> Vec<Issue> {
        tail(&self.shared.issues, limit)
    }

    /// Most recent `limit` actions, oldest first
    pub fn action_history(&self, limit: usize) -> Vec<RemediationAction> {
        tail(&self.shared.actions, limit)
    }

    pub fn issue_summary(&self) -> IssueSummary {
        let issues = self.shared.issues.read();
        let remediations = self.shared.remediations.read();

        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
        let mut unhandled_types: Vec<String> = Vec::new();
        let mut unresolved = 0;

        for issue in issues.iter() {
            *by_type.entry(issue.issue_type.clone()).or_default() += 1;
            *by_severity.entry(issue.severity).or_default() += 1;

            if !issue.remediation_successful {
                unresolved += 1;
            }
            if !remediations.contains_key(&issue.issue_type)
                && !unhandled_types.contains(&issue.issue_type)
            {
                unhandled_types.push(issue.issue_type.clone());
            }
        }

        let skip = issues.len().saturating_sub(RECENT_ISSUES);
        IssueSummary {
            total_issues: issues.len(),
            unresolved,
            by_type,
            by_severity,
            unhandled_types,
            recent: issues.iter().skip(skip).cloned().collect(),
        }
    }
}

impl Default for HealingLoop {
    fn default() -> Self {
        Self::new(HealingConfig::default())
    }
}
