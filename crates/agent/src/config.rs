//! Agent configuration

use anyhow::{Context, Result};
use autonomic_lib::diagnosis::DiagnosisConfig;
use autonomic_lib::healing::HealingConfig;
use autonomic_lib::monitor::MonitorConfig;
use autonomic_lib::trend::TrendConfig;
use autonomic_lib::{AutonomicConfig, MetricType};
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration, read from `AGENT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health, metrics and read-only state
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Resource sampling interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Resource samples kept in history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Samples kept per metric for trend analysis
    #[serde(default = "default_trend_window")]
    pub trend_window_size: usize,

    /// Utilization percent treated as exhaustion for cpu, memory and disk
    #[serde(default = "default_exhaustion_threshold")]
    pub exhaustion_threshold_percent: f64,

    /// Failures this many seconds apart are correlated
    #[serde(default = "default_correlation_window")]
    pub correlation_window_secs: u64,

    /// Healing cycle interval in seconds
    #[serde(default = "default_healing_interval")]
    pub healing_interval_secs: u64,

    /// Seconds to wait for control loops on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_sample_interval() -> u64 {
    5
}

fn default_history_capacity() -> usize {
    100
}

fn default_trend_window() -> usize {
    100
}

fn default_exhaustion_threshold() -> f64 {
    95.0
}

fn default_correlation_window() -> u64 {
    300
}

fn default_healing_interval() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT").try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    /// Engine configuration derived from the agent settings
    pub fn autonomic(&self) -> AutonomicConfig {
        let stop_timeout = Duration::from_secs(self.shutdown_timeout_secs);

        let mut trend = TrendConfig {
            window_size: self.trend_window_size,
            // One trend sample per resource sample
            sample_interval: Duration::from_secs(self.sample_interval_secs),
            ..TrendConfig::default()
        };
        for metric in [
            MetricType::CpuUsage,
            MetricType::MemoryUsage,
            MetricType::DiskUsage,
        ] {
            trend
                .thresholds
                .insert(metric, self.exhaustion_threshold_percent);
        }

        AutonomicConfig {
            monitor: MonitorConfig {
                sample_interval: Duration::from_secs(self.sample_interval_secs),
                history_capacity: self.history_capacity,
                stop_timeout,
            },
            trend,
            diagnosis: DiagnosisConfig {
                correlation_window: Duration::from_secs(self.correlation_window_secs),
                ..DiagnosisConfig::default()
            },
            healing: HealingConfig {
                cycle_interval: Duration::from_secs(self.healing_interval_secs),
                stop_timeout,
                ..HealingConfig::default()
            },
        }
    }
}
