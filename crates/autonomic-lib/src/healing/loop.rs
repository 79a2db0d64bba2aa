//! Periodic driver for healing cycles

use super::HealingShared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the healing loop
#[derive(Debug, Clone)]
pub struct HealingConfig {
    /// Time between cycles (default: 30 seconds)
    pub cycle_interval: Duration,
    /// Issues and actions kept in history (default: 1000)
    pub history_capacity: usize,
    /// Upper bound on waiting for an in-flight cycle on stop (default: 30 seconds)
    pub stop_timeout: Duration,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(30),
            history_capacity: 1000,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

pub(super) struct CycleLoop {
    shared: Arc<HealingShared>,
    interval: Duration,
}

impl CycleLoop {
    pub(super) fn new(shared: Arc<HealingShared>, interval: Duration) -> Self {
        Self { shared, interval }
    }

    pub(super) async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting healing loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let actions = self.shared.run_cycle().await;
                    debug!(
                        actions = actions.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Healing tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down healing loop");
                    break;
                }
            }
        }
    }
}
