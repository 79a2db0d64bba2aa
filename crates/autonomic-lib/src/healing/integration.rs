//! Healing monitors and remediations backed by the resource monitor and the
//! trend analyzer

use super::{
    DetectedIssue, HealingLoop, HealthMonitor, Issue, MonitorResult, Remediation,
    RemediationOutcome,
};
use crate::models::{ResourceState, Severity};
use crate::monitor::ResourceMonitor;
use crate::trend::TrendAnalyzer;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

/// Suggestions retained for operators
const SUGGESTION_CAPACITY: usize = 100;

/// Reports EMERGENCY and CRITICAL resource states
pub struct ResourceStateMonitor {
    monitor: Arc<ResourceMonitor>,
}

impl ResourceStateMonitor {
    pub fn new(monitor: Arc<ResourceMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl HealthMonitor for ResourceStateMonitor {
    fn name(&self) -> &str {
        "resource_state"
    }

    async fn check(&self) -> Result<MonitorResult> {
        let state = self.monitor.current_state();
        let (issue_type, severity) = match state {
            ResourceState::Emergency => {
                (HealingIntegration::RESOURCE_EMERGENCY, Severity::Critical)
            }
            ResourceState::Critical => (HealingIntegration::RESOURCE_PRESSURE, Severity::Warning),
            _ => return Ok(MonitorResult::Healthy),
        };

        let mut issue = DetectedIssue::new(
            issue_type,
            severity,
            format!("Resource state is {}", state),
        );
        if let Some(metrics) = self.monitor.current_metrics() {
            issue = issue
                .with_metric("cpu_percent", metrics.cpu_percent)
                .with_metric("memory_percent", metrics.memory_percent)
                .with_metric("disk_percent", metrics.disk_percent);
        }

        Ok(MonitorResult::Detected(issue))
    }
}

/// Reports current predictions of WARNING severity or worse
pub struct TrendForecastMonitor {
    analyzer: Arc<TrendAnalyzer>,
}

impl TrendForecastMonitor {
    pub fn new(analyzer: Arc<TrendAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl HealthMonitor for TrendForecastMonitor {
    fn name(&self) -> &str {
        "trend_forecast"
    }

    async fn check(&self) -> Result<MonitorResult> {
        let concerning: Vec<_> = self
            .analyzer
            .current_predictions()
            .into_iter()
            .filter(|p| p.severity >= Severity::Warning)
            .collect();

        // Predictions are ranked, so the first is the worst
        let Some(worst) = concerning.first() else {
            return Ok(MonitorResult::Healthy);
        };

        let mut issue = DetectedIssue::new(
            HealingIntegration::DEGRADING_TREND,
            worst.severity,
            format!(
                "{} concerning prediction(s); worst: {}",
                concerning.len(),
                worst.description
            ),
        );
        for prediction in &concerning {
            let key = format!("{}_probability", prediction.metric_type);
            let probability = issue.metrics.get(&key).copied().unwrap_or(0.0);
            issue = issue.with_metric(key, probability.max(prediction.probability));
        }

        Ok(MonitorResult::Detected(issue))
    }
}

/// Throttle admission and release what can be released
struct EmergencyRemediation {
    monitor: Arc<ResourceMonitor>,
}

#[async_trait]
impl Remediation for EmergencyRemediation {
    fn name(&self) -> &str {
        "throttle_and_release"
    }

    async fn remediate(&self, _issue: &Issue) -> Result<RemediationOutcome> {
        let newly_throttled = self.monitor.activate_throttle();
        let report = self.monitor.release_resources();

        let description = format!(
            "Throttle {}; {} release hook(s) run, {} failed",
            if newly_throttled { "activated" } else { "already active" },
            report.invoked,
            report.failed
        );

        if self.monitor.is_throttled() && report.failed == 0 {
            Ok(RemediationOutcome::succeeded(description))
        } else {
            Ok(RemediationOutcome::failed(description))
        }
    }
}

struct PressureRemediation {
    monitor: Arc<ResourceMonitor>,
}

#[async_trait]
impl Remediation for PressureRemediation {
    fn name(&self) -> &str {
        "release_resources"
    }

    async fn remediate(&self, _issue: &Issue) -> Result<RemediationOutcome> {
        let report = self.monitor.release_resources();
        let description = format!(
            "{} release hook(s) run, {} failed",
            report.invoked, report.failed
        );

        if report.failed == 0 {
            Ok(RemediationOutcome::succeeded(description))
        } else {
            Ok(RemediationOutcome::failed(description))
        }
    }
}

/// Turns concerning predictions into operator suggestions
struct TrendRemediation {
    analyzer: Arc<TrendAnalyzer>,
    suggestions: Arc<RwLock<VecDeque<String>>>,
}

#[async_trait]
impl Remediation for TrendRemediation {
    fn name(&self) -> &str {
        "emit_suggestions"
    }

    async fn remediate(&self, _issue: &Issue) -> Result<RemediationOutcome> {
        let mut added = 0;
        let mut suggestions = self.suggestions.write();

        for prediction in self.analyzer.current_predictions() {
            if prediction.severity < Severity::Warning {
                continue;
            }
            for action in &prediction.recommended_actions {
                let suggestion = format!("[{}] {}", prediction.metric_type, action);
                if suggestions.contains(&suggestion) {
                    continue;
                }
                info!(suggestion = %suggestion, "Healing suggestion");
                suggestions.push_back(suggestion);
                added += 1;
            }
        }

        while suggestions.len() > SUGGESTION_CAPACITY {
            suggestions.pop_front();
        }

        Ok(RemediationOutcome::succeeded(format!(
            "Recorded {} new suggestion(s)",
            added
        )))
    }
}

/// Connects resource and trend signals to a healing loop
pub struct HealingIntegration {
    monitor: Arc<ResourceMonitor>,
    analyzer: Arc<TrendAnalyzer>,
    suggestions: Arc<RwLock<VecDeque<String>>>,
}

impl HealingIntegration {
    pub const RESOURCE_EMERGENCY: &'static str = "resource_emergency";
    pub const RESOURCE_PRESSURE: &'static str = "resource_pressure";
    pub const DEGRADING_TREND: &'static str = "degrading_trend";

    pub fn new(monitor: Arc<ResourceMonitor>, analyzer: Arc<TrendAnalyzer>) -> Self {
        Self {
            monitor,
            analyzer,
            suggestions: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Register both monitors and all three remediations
    pub fn install(&self, healing: &HealingLoop) {
        healing.register_monitor(ResourceStateMonitor::new(self.monitor.clone()));
        healing.register_monitor(TrendForecastMonitor::new(self.analyzer.clone()));

        healing.register_remediation(
            Self::RESOURCE_EMERGENCY,
            EmergencyRemediation {
                monitor: self.monitor.clone(),
            },
        );
        healing.register_remediation(
            Self::RESOURCE_PRESSURE,
            PressureRemediation {
                monitor: self.monitor.clone(),
            },
        );
        healing.register_remediation(
            Self::DEGRADING_TREND,
            TrendRemediation {
                analyzer: self.analyzer.clone(),
                suggestions: self.suggestions.clone(),
            },
        );
    }

    /// Suggestions emitted so far, oldest first
    pub fn suggestions(&self) -> Vec<String> {
        self.suggestions.read().iter().cloned().collect()
    }
}
