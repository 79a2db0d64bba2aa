//! Core data models shared across the health subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Utilization breakpoints (percent) separating the resource states
pub const GOOD_THRESHOLD: f64 = 60.0;
pub const WARNING_THRESHOLD: f64 = 80.0;
pub const CRITICAL_THRESHOLD: f64 = 90.0;
pub const EMERGENCY_THRESHOLD: f64 = 95.0;

/// A single host utilization sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_bytes: u64,
    pub disk_percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceMetrics {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            memory_available_bytes: 0,
            disk_percent,
            timestamp: Utc::now(),
        }
    }

    /// Placeholder returned when no sample has ever succeeded
    pub fn unavailable() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Highest utilization across cpu, memory and disk
    pub fn peak_utilization(&self) -> f64 {
        self.cpu_percent
            .max(self.memory_percent)
            .max(self.disk_percent)
    }
}

/// Ordered classification of host load severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    #[default]
    Optimal,
    Good,
    Warning,
    Critical,
    Emergency,
}

impl ResourceState {
    pub const ALL: [ResourceState; 5] = [
        ResourceState::Optimal,
        ResourceState::Good,
        ResourceState::Warning,
        ResourceState::Critical,
        ResourceState::Emergency,
    ];

    /// Classify a sample by its peak utilization. Pure and total.
    pub fn classify(metrics: &ResourceMetrics) -> Self {
        Self::from_utilization(metrics.peak_utilization())
    }

    pub fn from_utilization(peak_percent: f64) -> Self {
        if peak_percent >= EMERGENCY_THRESHOLD {
            ResourceState::Emergency
        } else if peak_percent >= CRITICAL_THRESHOLD {
            ResourceState::Critical
        } else if peak_percent >= WARNING_THRESHOLD {
            ResourceState::Warning
        } else if peak_percent >= GOOD_THRESHOLD {
            ResourceState::Good
        } else {
            // NaN also lands here
            ResourceState::Optimal
        }
    }

    /// Whether a task of the given priority may run in this state
    pub fn admits(&self, priority: TaskPriority) -> bool {
        match self {
            ResourceState::Emergency => priority >= TaskPriority::Critical,
            ResourceState::Critical => priority >= TaskPriority::High,
            ResourceState::Warning => priority >= TaskPriority::Low,
            ResourceState::Good | ResourceState::Optimal => true,
        }
    }

    /// Scale a batch size down under load, never below 1
    pub fn scale_batch(&self, base: usize) -> usize {
        let scaled = match self {
            ResourceState::Emergency => base / 4,
            ResourceState::Critical => base / 2,
            ResourceState::Warning => base * 3 / 4,
            ResourceState::Good | ResourceState::Optimal => base,
        };
        scaled.max(1)
    }

    /// True for the states in which the throttle is released
    pub fn is_relaxed(&self) -> bool {
        matches!(self, ResourceState::Optimal | ResourceState::Good)
    }

    /// Numeric level used for gauges (0 = optimal, 4 = emergency)
    pub fn level(&self) -> i64 {
        *self as i64
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Optimal => write!(f, "optimal"),
            ResourceState::Good => write!(f, "good"),
            ResourceState::Warning => write!(f, "warning"),
            ResourceState::Critical => write!(f, "critical"),
            ResourceState::Emergency => write!(f, "emergency"),
        }
    }
}

/// Task priority used for admission gating only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Background,
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Background,
        TaskPriority::Low,
        TaskPriority::Medium,
        TaskPriority::High,
        TaskPriority::Critical,
    ];
}

/// Severity shared by predictions and healing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Metric vocabulary understood by the trend analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    ResponseTime,
    DatabaseLatency,
    ErrorRate,
    RequestRate,
}

impl MetricType {
    /// Latency-class metrics are checked for performance degradation
    pub fn is_latency(&self) -> bool {
        matches!(self, MetricType::ResponseTime | MetricType::DatabaseLatency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::CpuUsage => "cpu_usage",
            MetricType::MemoryUsage => "memory_usage",
            MetricType::DiskUsage => "disk_usage",
            MetricType::ResponseTime => "response_time",
            MetricType::DatabaseLatency => "database_latency",
            MetricType::ErrorRate => "error_rate",
            MetricType::RequestRate => "request_rate",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
