//! Observability for the autonomic subsystem
//!
//! Provides:
//! - Prometheus metrics held in an explicit registry owned by the system handle
//! - Structured logging of domain events with tracing

use crate::diagnosis::{Failure, RootCauseAnalysis};
use crate::error::HealingFault;
use crate::healing::{HealingMetrics, Issue, RemediationAction};
use crate::models::{ResourceMetrics, ResourceState, Severity};
use crate::trend::IssuePrediction;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::{info, warn};

/// Prometheus metrics for the subsystem
///
/// Clones share the same underlying collectors and registry.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: Registry,
    resource_state: IntGauge,
    throttled: IntGauge,
    cpu_percent: Gauge,
    memory_percent: Gauge,
    disk_percent: Gauge,
    probe_failures: IntGauge,
    current_predictions: IntGauge,
    healing_cycles: IntGauge,
    issues_detected: IntGauge,
    remediations: IntGauge,
    successful_remediations: IntGauge,
    failed_remediations: IntGauge,
    failures_recorded: IntCounter,
    healing_faults: IntCounter,
}

impl AgentMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let int_gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let gauge = |name: &str, help: &str| -> prometheus::Result<Gauge> {
            let gauge = Gauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            resource_state: int_gauge(
                "autonomic_resource_state",
                "Current resource state (0=optimal .. 4=emergency)",
            )?,
            throttled: int_gauge(
                "autonomic_throttle_active",
                "Whether the emergency throttle is active",
            )?,
            cpu_percent: gauge("autonomic_cpu_percent", "Last sampled CPU utilization")?,
            memory_percent: gauge("autonomic_memory_percent", "Last sampled memory utilization")?,
            disk_percent: gauge("autonomic_disk_percent", "Last sampled disk utilization")?,
            probe_failures: int_gauge(
                "autonomic_probe_failures_total",
                "Metrics probe failures since start",
            )?,
            current_predictions: int_gauge(
                "autonomic_current_predictions",
                "Issue predictions in the latest analysis pass",
            )?,
            healing_cycles: int_gauge("autonomic_healing_cycles_total", "Healing cycles run")?,
            issues_detected: int_gauge(
                "autonomic_healing_issues_detected_total",
                "Issues detected by healing monitors",
            )?,
            remediations: int_gauge(
                "autonomic_healing_remediations_total",
                "Remediations attempted",
            )?,
            successful_remediations: int_gauge(
                "autonomic_healing_remediations_succeeded_total",
                "Remediations that reported success",
            )?,
            failed_remediations: int_gauge(
                "autonomic_healing_remediations_failed_total",
                "Remediations that failed or faulted",
            )?,
            failures_recorded: counter(
                "autonomic_failures_recorded_total",
                "Component failures recorded for diagnosis",
            )?,
            healing_faults: counter(
                "autonomic_healing_faults_total",
                "Monitor and remediation faults isolated by the healing loop",
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn observe_sample(&self, metrics: &ResourceMetrics) {
        self.cpu_percent.set(metrics.cpu_percent);
        self.memory_percent.set(metrics.memory_percent);
        self.disk_percent.set(metrics.disk_percent);
    }

    pub fn set_resource_state(&self, state: ResourceState) {
        self.resource_state.set(state.level());
    }

    pub fn set_throttled(&self, throttled: bool) {
        self.throttled.set(i64::from(throttled));
    }

    pub fn set_probe_failures(&self, failures: u64) {
        self.probe_failures.set(failures as i64);
    }

    pub fn set_current_predictions(&self, count: usize) {
        self.current_predictions.set(count as i64);
    }

    pub fn set_healing(&self, metrics: &HealingMetrics) {
        self.healing_cycles.set(metrics.cycles as i64);
        self.issues_detected.set(metrics.issues_detected as i64);
        self.remediations.set(metrics.remediations as i64);
        self.successful_remediations
            .set(metrics.successful_remediations as i64);
        self.failed_remediations.set(metrics.failed_remediations as i64);
    }

    pub fn inc_failures_recorded(&self) {
        self.failures_recorded.inc();
    }

    pub fn inc_healing_faults(&self) {
        self.healing_faults.inc();
    }
}

/// Structured logger for subsystem events
///
/// Every event carries `event` and `node` fields so log pipelines can
/// filter on them.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "system_started",
            node = %self.node_name,
            version = %version,
            "Autonomic health system started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "system_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Autonomic health system shutting down"
        );
    }

    pub fn log_state_change(&self, from: ResourceState, to: ResourceState) {
        if to > from && to >= ResourceState::Critical {
            warn!(
                event = "resource_state_changed",
                node = %self.node_name,
                from = %from,
                to = %to,
                "Resource pressure escalated"
            );
        } else {
            info!(
                event = "resource_state_changed",
                node = %self.node_name,
                from = %from,
                to = %to,
                "Resource state changed"
            );
        }
    }

    pub fn log_prediction(&self, prediction: &IssuePrediction) {
        match prediction.severity {
            Severity::Critical => warn!(
                event = "issue_predicted",
                node = %self.node_name,
                metric = %prediction.metric_type,
                kind = ?prediction.kind,
                severity = %prediction.severity,
                probability = prediction.probability,
                confidence = prediction.confidence,
                predicted_time = ?prediction.predicted_time,
                "{}",
                prediction.description
            ),
            _ => info!(
                event = "issue_predicted",
                node = %self.node_name,
                metric = %prediction.metric_type,
                kind = ?prediction.kind,
                severity = %prediction.severity,
                probability = prediction.probability,
                confidence = prediction.confidence,
                "{}",
                prediction.description
            ),
        }
    }

    pub fn log_issue(&self, issue: &Issue) {
        info!(
            event = "healing_issue",
            node = %self.node_name,
            issue_id = issue.id,
            issue_type = %issue.issue_type,
            severity = %issue.severity,
            remediation_attempted = issue.remediation_attempted,
            remediation_successful = issue.remediation_successful,
            "{}",
            issue.description
        );
    }

    pub fn log_remediation(&self, action: &RemediationAction) {
        if action.success {
            info!(
                event = "remediation_executed",
                node = %self.node_name,
                issue_type = %action.issue_type,
                action = %action.action,
                success = true,
                details = %action.details,
                "Remediation succeeded"
            );
        } else {
            warn!(
                event = "remediation_executed",
                node = %self.node_name,
                issue_type = %action.issue_type,
                action = %action.action,
                success = false,
                details = %action.details,
                "Remediation failed"
            );
        }
    }

    pub fn log_healing_fault(&self, fault: &HealingFault) {
        warn!(
            event = "healing_fault",
            node = %self.node_name,
            source = %fault.source_name(),
            error = %fault,
            "Healing fault isolated"
        );
    }

    pub fn log_failure_recorded(&self, failure: &Failure) {
        info!(
            event = "failure_recorded",
            node = %self.node_name,
            failure_id = %failure.id,
            component = %failure.component_id,
            failure_type = %failure.failure_type,
            symptoms = failure.symptoms.len(),
            "{}",
            failure.description
        );
    }

    pub fn log_analysis(&self, analysis: &RootCauseAnalysis) {
        info!(
            event = "root_cause_analyzed",
            node = %self.node_name,
            failure_id = %analysis.failure_id,
            root_causes = ?analysis.root_causes,
            chain_len = analysis.causal_chain.len(),
            confidence = analysis.confidence,
            "{}",
            analysis.explanation
        );
    }

    pub fn log_healing_summary(&self, metrics: &HealingMetrics) {
        info!(
            event = "healing_cycle",
            node = %self.node_name,
            cycles = metrics.cycles,
            issues_detected = metrics.issues_detected,
            remediations = metrics.remediations,
            successful = metrics.successful_remediations,
            failed = metrics.failed_remediations,
            "Healing cycle summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_independent_per_registry() {
        // Two handles never collide because neither touches a global registry
        let first = AgentMetrics::new().unwrap();
        let second = AgentMetrics::new().unwrap();

        first.set_resource_state(ResourceState::Emergency);
        second.set_resource_state(ResourceState::Good);

        assert!(first.render().unwrap().contains("autonomic_resource_state 4"));
        assert!(second.render().unwrap().contains("autonomic_resource_state 1"));
    }

    #[test]
    fn test_render_includes_healing_counters() {
        let metrics = AgentMetrics::new().unwrap();
        metrics.set_healing(&HealingMetrics {
            cycles: 7,
            issues_detected: 3,
            remediations: 2,
            successful_remediations: 1,
            failed_remediations: 1,
        });
        metrics.observe_sample(&ResourceMetrics::new(12.5, 40.0, 70.0));
        metrics.set_throttled(true);
        metrics.inc_failures_recorded();

        let text = metrics.render().unwrap();
        assert!(text.contains("autonomic_healing_cycles_total 7"));
        assert!(text.contains("autonomic_healing_remediations_failed_total 1"));
        assert!(text.contains("autonomic_cpu_percent 12.5"));
        assert!(text.contains("autonomic_throttle_active 1"));
        assert!(text.contains("autonomic_failures_recorded_total 1"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
        logger.log_state_change(ResourceState::Good, ResourceState::Emergency);
    }
}
