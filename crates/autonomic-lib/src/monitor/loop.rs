//! Resource sampling loop
//!
//! Periodically polls the gateway, updating the monitor's current sample,
//! bounded history, state and throttle flag.

use super::{MonitorShared, ResourceMonitor};
use crate::gateway::MetricsGateway;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the resource monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sampling interval (default: 5 seconds)
    pub sample_interval: Duration,
    /// Number of samples kept in history (default: 100)
    pub history_capacity: usize,
    /// Upper bound on waiting for the loop to stop (default: 30 seconds)
    pub stop_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            history_capacity: 100,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

pub(super) struct SamplingLoop {
    shared: Arc<MonitorShared>,
}

impl SamplingLoop {
    pub(super) fn new(shared: Arc<MonitorShared>) -> Self {
        Self { shared }
    }

    pub(super) async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.shared.config.sample_interval.as_millis() as u64,
            "Starting resource sampling loop"
        );

        let mut ticker = interval(self.shared.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut iterations = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let state = self.shared.poll().await;
                    iterations += 1;

                    if iterations % 12 == 0 {
                        // Every minute at the default 5s interval
                        debug!(
                            state = %state,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Sampling cycle complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down resource sampling loop");
                    break;
                }
            }
        }
    }
}

/// Builder for creating a resource monitor
pub struct ResourceMonitorBuilder {
    gateway: Option<Arc<dyn MetricsGateway>>,
    config: MonitorConfig,
}

impl ResourceMonitorBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            config: MonitorConfig::default(),
        }
    }

    /// Set the metrics gateway
    pub fn gateway(mut self, gateway: Arc<dyn MetricsGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the sampling interval
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Set the history capacity
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Set the bound on waiting for the loop to stop
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ResourceMonitor> {
        let gateway = self
            .gateway
            .ok_or_else(|| anyhow::anyhow!("Metrics gateway is required"))?;

        Ok(ResourceMonitor::new(gateway, self.config))
    }
}

impl Default for ResourceMonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::async_trait;
    use crate::models::{ResourceMetrics, ResourceState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock gateway returning a constant high-load sample
    struct MockGateway {
        call_count: AtomicUsize,
    }

    impl MockGateway {
        fn new() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsGateway for MockGateway {
        async fn sample(&self) -> Result<ResourceMetrics> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(ResourceMetrics::new(91.0, 40.0, 20.0))
        }
    }

    #[test]
    fn test_monitor_config_default() {
        let config = MonitorConfig::default();
        assert_eq!(config.sample_interval, Duration::from_secs(5));
        assert_eq!(config.history_capacity, 100);
    }

    #[test]
    fn test_builder_requires_gateway() {
        let result = ResourceMonitorBuilder::new().history_capacity(10).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_loop_samples_until_stopped() {
        let gateway = Arc::new(MockGateway::new());
        let monitor = ResourceMonitorBuilder::new()
            .gateway(gateway.clone())
            .sample_interval(Duration::from_millis(10))
            .build()
            .unwrap();

        monitor.start().await;
        assert!(monitor.is_running().await);

        // Starting twice does not spawn a second loop
        monitor.start().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        monitor.stop().await;
        assert!(!monitor.is_running().await);

        let calls = gateway.call_count.load(Ordering::SeqCst);
        assert!(calls >= 2, "expected several samples, got {}", calls);
        assert_eq!(monitor.current_state(), ResourceState::Critical);

        // No further samples after stop returns
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(gateway.call_count.load(Ordering::SeqCst), calls);
    }
}
