//! Homeostatic resource monitoring
//!
//! The monitor samples host utilization through a [`MetricsGateway`], classifies
//! each sample into a [`ResourceState`] and exposes the control API other
//! subsystems use to gate work:
//! - task admission by priority
//! - batch size scaling
//! - an emergency throttle flag
//!
//! All mutable state is written only by the sampling path (`poll_once`, which
//! the background loop drives). External callers read snapshots or go through
//! the throttle and release APIs.

mod r#loop;

pub use r#loop::{MonitorConfig, ResourceMonitorBuilder};

use crate::gateway::MetricsGateway;
use crate::models::{ResourceMetrics, ResourceState, TaskPriority};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ticker::LoopHandle;
use r#loop::SamplingLoop;

/// Invoked with `(previous, current)` once per state transition
pub type StateChangeCallback = Arc<dyn Fn(ResourceState, ResourceState) + Send + Sync>;

/// Invoked with every fresh sample
pub type SampleCallback = Arc<dyn Fn(&ResourceMetrics) + Send + Sync>;

/// Frees some resource (caches, buffers) when the host is under pressure
pub type ReleaseHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Snapshot of monitor state for reporting
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub state: ResourceState,
    pub throttled: bool,
    pub running: bool,
    pub samples_collected: u64,
    pub probe_failures: u64,
    pub state_transitions: u64,
    pub throttle_activations: u64,
    pub history_len: usize,
    pub current: Option<ResourceMetrics>,
}

/// Outcome of a resource release request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
struct MonitorCounters {
    samples: AtomicU64,
    probe_failures: AtomicU64,
    transitions: AtomicU64,
    throttle_activations: AtomicU64,
}

/// State shared between the monitor handle and its sampling loop
pub(crate) struct MonitorShared {
    gateway: Arc<dyn MetricsGateway>,
    config: MonitorConfig,
    current: RwLock<Option<ResourceMetrics>>,
    history: RwLock<VecDeque<ResourceMetrics>>,
    state: RwLock<ResourceState>,
    throttled: AtomicBool,
    state_callbacks: RwLock<Vec<StateChangeCallback>>,
    sample_callbacks: RwLock<Vec<SampleCallback>>,
    release_hooks: RwLock<Vec<(String, ReleaseHook)>>,
    counters: MonitorCounters,
    poll_lock: tokio::sync::Mutex<()>,
}

impl MonitorShared {
    fn new(gateway: Arc<dyn MetricsGateway>, config: MonitorConfig) -> Self {
        Self {
            gateway,
            current: RwLock::new(None),
            history: RwLock::new(VecDeque::with_capacity(config.history_capacity)),
            state: RwLock::new(ResourceState::default()),
            throttled: AtomicBool::new(false),
            state_callbacks: RwLock::new(Vec::new()),
            sample_callbacks: RwLock::new(Vec::new()),
            release_hooks: RwLock::new(Vec::new()),
            counters: MonitorCounters::default(),
            poll_lock: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Ask the gateway for a sample, counting failures
    async fn sample_fresh(&self) -> Option<ResourceMetrics> {
        match self.gateway.sample().await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                self.counters.probe_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Metrics probe failed, using last known sample");
                None
            }
        }
    }

    async fn collect(&self) -> ResourceMetrics {
        match self.sample_fresh().await {
            Some(metrics) => metrics,
            None => self
                .current
                .read()
                .clone()
                .unwrap_or_else(ResourceMetrics::unavailable),
        }
    }

    /// One sampling iteration. Only one runs at a time.
    pub(crate) async fn poll(&self) -> ResourceState {
        let _guard = self.poll_lock.lock().await;

        let Some(metrics) = self.sample_fresh().await else {
            return *self.state.read();
        };

        let new_state = ResourceState::classify(&metrics);
        self.record(metrics.clone());

        let previous = std::mem::replace(&mut *self.state.write(), new_state);
        if previous != new_state {
            self.counters.transitions.fetch_add(1, Ordering::Relaxed);
            info!(from = %previous, to = %new_state, "Resource state changed");

            let callbacks = self.state_callbacks.read().clone();
            for callback in callbacks {
                callback(previous, new_state);
            }
        }

        if new_state == ResourceState::Emergency {
            self.activate_throttle();
        } else if new_state.is_relaxed() {
            self.deactivate_throttle();
        }

        let callbacks = self.sample_callbacks.read().clone();
        for callback in callbacks {
            callback(&metrics);
        }

        new_state
    }

    fn record(&self, metrics: ResourceMetrics) {
        self.counters.samples.fetch_add(1, Ordering::Relaxed);

        let mut history = self.history.write();
        history.push_back(metrics.clone());
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
        drop(history);

        *self.current.write() = Some(metrics);
    }

    fn activate_throttle(&self) -> bool {
        let changed = !self.throttled.swap(true, Ordering::SeqCst);
        if changed {
            self.counters
                .throttle_activations
                .fetch_add(1, Ordering::Relaxed);
            warn!("Emergency throttle activated");
        }
        changed
    }

    fn deactivate_throttle(&self) -> bool {
        let changed = self.throttled.swap(false, Ordering::SeqCst);
        if changed {
            info!("Emergency throttle released");
        }
        changed
    }
}

/// Classifies host load and gates work accordingly
pub struct ResourceMonitor {
    shared: Arc<MonitorShared>,
    runner: tokio::sync::Mutex<Option<LoopHandle>>,
}

impl ResourceMonitor {
    /// Create a monitor over the given gateway
    pub fn new(gateway: Arc<dyn MetricsGateway>, config: MonitorConfig) -> Self {
        Self {
            shared: Arc::new(MonitorShared::new(gateway, config)),
            runner: tokio::sync::Mutex::new(None),
        }
    }

    pub fn builder() -> ResourceMonitorBuilder {
        ResourceMonitorBuilder::new()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Start the background sampling loop. No-op if already running.
    pub async fn start(&self) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("Resource monitor already running");
            return;
        }

        let sampling = SamplingLoop::new(Arc::clone(&self.shared));
        *runner = Some(LoopHandle::spawn("resource_monitor", |shutdown| {
            sampling.run(shutdown)
        }));
    }

    /// Stop the sampling loop, waiting for an in-flight iteration to finish
    pub async fn stop(&self) {
        let handle = self.runner.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown(self.shared.config.stop_timeout).await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Take a sample. Never fails: falls back to the last known sample when
    /// the probe errors, and to an all-zero sample if none exists yet.
    pub async fn collect(&self) -> ResourceMetrics {
        self.shared.collect().await
    }

    /// Run one sampling iteration and return the resulting state
    pub async fn poll_once(&self) -> ResourceState {
        self.shared.poll().await
    }

    /// Classify a sample. Pure and total.
    pub fn classify(metrics: &ResourceMetrics) -> ResourceState {
        ResourceState::classify(metrics)
    }

    pub fn current_state(&self) -> ResourceState {
        *self.shared.state.read()
    }

    pub fn current_metrics(&self) -> Option<ResourceMetrics> {
        self.shared.current.read().clone()
    }

    /// Most recent `limit` samples, oldest first
    pub fn metrics_history(&self, limit: usize) -> Vec<ResourceMetrics> {
        let history = self.shared.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// State used for gating: the throttle forces emergency policy
    fn effective_state(&self) -> ResourceState {
        if self.is_throttled() {
            ResourceState::Emergency
        } else {
            self.current_state()
        }
    }

    pub fn should_execute(&self, priority: TaskPriority) -> bool {
        self.should_execute_in(priority, None)
    }

    /// Admission check against an explicit state, or the effective one
    pub fn should_execute_in(&self, priority: TaskPriority, state: Option<ResourceState>) -> bool {
        state
            .unwrap_or_else(|| self.effective_state())
            .admits(priority)
    }

    pub fn recommended_batch_size(&self, base: usize) -> usize {
        self.recommended_batch_size_in(base, None)
    }

    pub fn recommended_batch_size_in(&self, base: usize, state: Option<ResourceState>) -> usize {
        state
            .unwrap_or_else(|| self.effective_state())
            .scale_batch(base)
    }

    /// Returns true if the throttle was not already active
    pub fn activate_throttle(&self) -> bool {
        self.shared.activate_throttle()
    }

    /// Returns true if the throttle was active
    pub fn deactivate_throttle(&self) -> bool {
        self.shared.deactivate_throttle()
    }

    pub fn is_throttled(&self) -> bool {
        self.shared.throttled.load(Ordering::SeqCst)
    }

    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ResourceState, ResourceState) + Send + Sync + 'static,
    {
        self.shared.state_callbacks.write().push(Arc::new(callback));
    }

    pub fn on_sample<F>(&self, callback: F)
    where
        F: Fn(&ResourceMetrics) + Send + Sync + 'static,
    {
        self.shared.sample_callbacks.write().push(Arc::new(callback));
    }

    pub fn add_release_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared
            .release_hooks
            .write()
            .push((name.into(), Arc::new(hook)));
    }

    /// Run every release hook; a failing hook does not stop the rest
    pub fn release_resources(&self) -> ReleaseReport {
        let hooks = self.shared.release_hooks.read().clone();
        let mut report = ReleaseReport::default();

        for (name, hook) in hooks {
            report.invoked += 1;
            if let Err(e) = hook() {
                report.failed += 1;
                warn!(hook = %name, error = %e, "Resource release hook failed");
            }
        }

        info!(
            invoked = report.invoked,
            failed = report.failed,
            "Resource release requested"
        );
        report
    }

    pub async fn stats(&self) -> MonitorStats {
        let counters = &self.shared.counters;
        MonitorStats {
            state: self.current_state(),
            throttled: self.is_throttled(),
            running: self.is_running().await,
            samples_collected: counters.samples.load(Ordering::Relaxed),
            probe_failures: counters.probe_failures.load(Ordering::Relaxed),
            state_transitions: counters.transitions.load(Ordering::Relaxed),
            throttle_activations: counters.throttle_activations.load(Ordering::Relaxed),
            history_len: self.shared.history.read().len(),
            current: self.current_metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Gateway replaying a fixed script of samples; `None` entries fail
    struct ScriptedGateway {
        script: Mutex<VecDeque<Option<ResourceMetrics>>>,
    }

    impl ScriptedGateway {
        fn new(samples: Vec<Option<(f64, f64, f64)>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    samples
                        .into_iter()
                        .map(|s| s.map(|(c, m, d)| ResourceMetrics::new(c, m, d)))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl MetricsGateway for ScriptedGateway {
        async fn sample(&self) -> anyhow::Result<ResourceMetrics> {
            match self.script.lock().pop_front() {
                Some(Some(metrics)) => Ok(metrics),
                _ => Err(anyhow::anyhow!("probe offline")),
            }
        }
    }

    fn monitor(samples: Vec<Option<(f64, f64, f64)>>) -> ResourceMonitor {
        ResourceMonitor::new(ScriptedGateway::new(samples), MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_emergency_scenario() {
        let monitor = monitor(vec![Some((96.0, 50.0, 30.0))]);

        let state = monitor.poll_once().await;

        assert_eq!(state, ResourceState::Emergency);
        assert!(!monitor.should_execute(TaskPriority::Low));
        assert!(monitor.should_execute(TaskPriority::Critical));
        assert_eq!(monitor.recommended_batch_size(100), 25);
        assert!(monitor.is_throttled());
    }

    #[tokio::test]
    async fn test_throttle_released_when_relaxed() {
        let monitor = monitor(vec![
            Some((97.0, 10.0, 10.0)),
            Some((85.0, 10.0, 10.0)),
            Some((40.0, 10.0, 10.0)),
        ]);

        monitor.poll_once().await;
        assert!(monitor.is_throttled());

        // Warning keeps the throttle engaged
        monitor.poll_once().await;
        assert!(monitor.is_throttled());
        assert!(!monitor.should_execute(TaskPriority::High));

        monitor.poll_once().await;
        assert!(!monitor.is_throttled());
        assert!(monitor.should_execute(TaskPriority::Background));
    }

    #[tokio::test]
    async fn test_collect_falls_back_to_last_known() {
        let monitor = monitor(vec![Some((42.0, 10.0, 10.0)), None, None]);

        monitor.poll_once().await;
        let fallback = monitor.collect().await;
        assert_eq!(fallback.cpu_percent, 42.0);

        let state = monitor.poll_once().await;
        assert_eq!(state, ResourceState::Optimal);

        let stats = monitor.stats().await;
        assert_eq!(stats.samples_collected, 1);
        assert_eq!(stats.probe_failures, 2);
    }

    #[tokio::test]
    async fn test_collect_without_any_sample() {
        let monitor = monitor(vec![None]);
        let metrics = monitor.collect().await;
        assert_eq!(metrics.peak_utilization(), 0.0);
        assert!(monitor.current_metrics().is_none());
    }

    #[tokio::test]
    async fn test_state_callback_fires_once_per_transition() {
        let monitor = monitor(vec![
            Some((10.0, 10.0, 10.0)),
            Some((85.0, 10.0, 10.0)),
            Some((86.0, 10.0, 10.0)),
            Some((87.0, 10.0, 10.0)),
            Some((10.0, 10.0, 10.0)),
        ]);

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&transitions);
        monitor.on_state_change(move |from, to| seen.lock().push((from, to)));

        for _ in 0..5 {
            monitor.poll_once().await;
        }

        assert_eq!(
            *transitions.lock(),
            vec![
                (ResourceState::Optimal, ResourceState::Warning),
                (ResourceState::Warning, ResourceState::Optimal),
            ]
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let samples = (0..10).map(|i| Some((i as f64, 0.0, 0.0))).collect();
        let monitor = ResourceMonitor::new(
            ScriptedGateway::new(samples),
            MonitorConfig {
                history_capacity: 4,
                ..Default::default()
            },
        );

        for _ in 0..10 {
            monitor.poll_once().await;
        }

        let history = monitor.metrics_history(100);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].cpu_percent, 6.0);
        assert_eq!(history[3].cpu_percent, 9.0);

        let recent = monitor.metrics_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].cpu_percent, 9.0);
    }

    #[test]
    fn test_throttle_is_idempotent() {
        let monitor = monitor(vec![]);

        assert!(monitor.activate_throttle());
        assert!(!monitor.activate_throttle());
        assert!(monitor.is_throttled());

        assert!(monitor.deactivate_throttle());
        assert!(!monitor.deactivate_throttle());
        assert!(!monitor.is_throttled());
    }

    #[test]
    fn test_explicit_state_overrides() {
        let monitor = monitor(vec![]);

        assert!(!monitor.should_execute_in(TaskPriority::Medium, Some(ResourceState::Critical)));
        assert_eq!(
            monitor.recommended_batch_size_in(10, Some(ResourceState::Warning)),
            7
        );
        assert_eq!(monitor.recommended_batch_size(10), 10);
    }

    #[test]
    fn test_release_hooks_isolated() {
        let monitor = monitor(vec![]);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        monitor.add_release_hook("cache", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        monitor.add_release_hook("broken", || Err(anyhow::anyhow!("nothing to free")));

        let report = monitor.release_resources();

        assert_eq!(report, ReleaseReport { invoked: 2, failed: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
