//! Process-wide context handle
//!
//! `AutonomicSystem` is built once at startup and owns every engine, the
//! health registry and the metrics registry. Dependents receive it by
//! reference; nothing in the crate keeps module-level state.

use crate::diagnosis::{
    ComponentHealthReport, DiagnosisConfig, Failure, RootCauseAnalysis, RootCauseEngine,
};
use crate::error::DiagnosisError;
use crate::gateway::MetricsGateway;
use crate::healing::{HealingConfig, HealingIntegration, HealingLoop};
use crate::health::{components, HealthRegistry};
use crate::models::{MetricType, ResourceState};
use crate::monitor::{MonitorConfig, ResourceMonitor};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::trend::{TrendAnalyzer, TrendConfig};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Consecutive faulting healing cycles before the loop is reported unhealthy
const UNHEALTHY_AFTER_FAULTING_CYCLES: u32 = 3;

/// Configuration for every engine in the subsystem
#[derive(Debug, Clone, Default)]
pub struct AutonomicConfig {
    pub monitor: MonitorConfig,
    pub trend: TrendConfig,
    pub diagnosis: DiagnosisConfig,
    pub healing: HealingConfig,
}

pub struct AutonomicSystem {
    monitor: Arc<ResourceMonitor>,
    analyzer: Arc<TrendAnalyzer>,
    diagnosis: Arc<RootCauseEngine>,
    healing: Arc<HealingLoop>,
    integration: HealingIntegration,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl AutonomicSystem {
    /// Build and wire all engines. Nothing runs until [`start`](Self::start).
    pub fn new(
        gateway: Arc<dyn MetricsGateway>,
        config: AutonomicConfig,
        node_name: impl Into<String>,
    ) -> Result<Self> {
        let metrics = AgentMetrics::new().context("Failed to register metrics")?;
        let logger = StructuredLogger::new(node_name);
        let health = HealthRegistry::new();

        let monitor = Arc::new(ResourceMonitor::new(gateway, config.monitor));
        let analyzer = Arc::new(TrendAnalyzer::new(config.trend));
        let diagnosis = Arc::new(RootCauseEngine::new(config.diagnosis));
        let healing = Arc::new(HealingLoop::new(config.healing));

        for component in [
            components::RESOURCE_MONITOR,
            components::TREND_ANALYZER,
            components::DIAGNOSIS_ENGINE,
            components::HEALING_LOOP,
        ] {
            health.register(component);
        }

        // Every sample also feeds the trend analyzer as one update cycle
        {
            let analyzer = analyzer.clone();
            let metrics = metrics.clone();
            let logger = logger.clone();
            monitor.on_sample(move |sample| {
                metrics.observe_sample(sample);

                let predictions = analyzer.update_metrics(&[
                    (MetricType::CpuUsage, sample.cpu_percent),
                    (MetricType::MemoryUsage, sample.memory_percent),
                    (MetricType::DiskUsage, sample.disk_percent),
                ]);
                metrics.set_current_predictions(predictions.len());
                for prediction in &predictions {
                    logger.log_prediction(prediction);
                }
            });
        }

        {
            let health = health.clone();
            let metrics = metrics.clone();
            let logger = logger.clone();
            monitor.on_state_change(move |from, to| {
                logger.log_state_change(from, to);
                metrics.set_resource_state(to);

                match to {
                    ResourceState::Emergency | ResourceState::Critical => health.set_degraded(
                        components::RESOURCE_MONITOR,
                        format!("Resource state {}", to),
                    ),
                    _ => health.set_healthy(components::RESOURCE_MONITOR),
                }
            });
        }

        // Alerts fire during a cycle and the metrics callback closes it, so
        // health is settled once per cycle from the faults counted in between
        let cycle_faults = Arc::new(AtomicU64::new(0));
        let faulting_streak = Arc::new(AtomicU32::new(0));

        {
            let monitor = monitor.clone();
            let health = health.clone();
            let metrics = metrics.clone();
            let logger = logger.clone();
            let cycle_faults = cycle_faults.clone();
            healing.on_metrics(move |snapshot| {
                metrics.set_healing(snapshot);
                metrics.set_throttled(monitor.is_throttled());
                logger.log_healing_summary(snapshot);

                let faults = cycle_faults.swap(0, Ordering::SeqCst);
                if faults == 0 {
                    faulting_streak.store(0, Ordering::SeqCst);
                    health.set_healthy(components::HEALING_LOOP);
                    return;
                }

                let streak = faulting_streak.fetch_add(1, Ordering::SeqCst) + 1;
                let message = format!(
                    "{} fault(s) in the last cycle, {} faulting cycle(s) in a row",
                    faults, streak
                );
                if streak >= UNHEALTHY_AFTER_FAULTING_CYCLES {
                    health.set_unhealthy(components::HEALING_LOOP, message);
                } else {
                    health.set_degraded(components::HEALING_LOOP, message);
                }
            });
        }

        {
            let health = health.clone();
            let metrics = metrics.clone();
            let logger = logger.clone();
            healing.on_alert(move |fault| {
                cycle_faults.fetch_add(1, Ordering::SeqCst);
                metrics.inc_healing_faults();
                logger.log_healing_fault(fault);
                health.set_degraded(components::HEALING_LOOP, fault.to_string());
            });
        }

        {
            let logger = logger.clone();
            healing.on_issue(move |issue| logger.log_issue(issue));
        }
        {
            let logger = logger.clone();
            healing.on_action(move |action| logger.log_remediation(action));
        }

        let integration = HealingIntegration::new(monitor.clone(), analyzer.clone());
        integration.install(&healing);

        Ok(Self {
            monitor,
            analyzer,
            diagnosis,
            healing,
            integration,
            health,
            metrics,
            logger,
        })
    }

    /// Start the sampling and healing loops and mark the system ready
    pub async fn start(&self) {
        self.monitor.start().await;
        self.healing.start().await;
        self.health.set_ready(true);
        self.logger.log_startup(env!("CARGO_PKG_VERSION"));
    }

    /// Stop both loops, waiting for in-flight iterations
    pub async fn stop(&self, reason: &str) {
        self.logger.log_shutdown(reason);
        self.health.set_ready(false);
        self.healing.stop().await;
        self.monitor.stop().await;
        info!("Autonomic health system stopped");
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn analyzer(&self) -> &Arc<TrendAnalyzer> {
        &self.analyzer
    }

    pub fn diagnosis(&self) -> &Arc<RootCauseEngine> {
        &self.diagnosis
    }

    pub fn healing(&self) -> &Arc<HealingLoop> {
        &self.healing
    }

    pub fn integration(&self) -> &HealingIntegration {
        &self.integration
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Record a failure for later diagnosis
    pub fn record_failure(&self, failure: Failure) -> Failure {
        let failure = self.diagnosis.record(failure);
        self.metrics.inc_failures_recorded();
        self.logger.log_failure_recorded(&failure);
        failure
    }

    pub fn analyze_failure(&self, failure_id: &str) -> Result<RootCauseAnalysis, DiagnosisError> {
        let analysis = self.diagnosis.analyze(failure_id)?;
        self.logger.log_analysis(&analysis);
        Ok(analysis)
    }

    pub fn component_health(&self, component_id: &str) -> ComponentHealthReport {
        self.diagnosis.component_health(component_id)
    }

    /// Refresh gauges that are read rather than pushed, then render
    pub async fn render_metrics(&self) -> Result<String> {
        let stats = self.monitor.stats().await;
        self.metrics.set_probe_failures(stats.probe_failures);
        self.metrics.set_throttled(stats.throttled);
        self.metrics.set_resource_state(stats.state);
        self.metrics.render()
    }
}
