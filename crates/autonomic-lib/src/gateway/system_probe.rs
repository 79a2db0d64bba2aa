//! sysinfo-backed host probe

use super::MetricsGateway;
use crate::error::ProbeError;
use crate::models::ResourceMetrics;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::debug;

/// Samples CPU, memory and root-disk utilization from the local host
///
/// CPU usage is computed between consecutive refreshes, so the very first
/// sample after construction may read close to zero.
pub struct SystemProbe {
    state: Arc<Mutex<ProbeState>>,
}

struct ProbeState {
    system: System,
    disks: Disks,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        let disks = Disks::new_with_refreshed_list();

        Self {
            state: Arc::new(Mutex::new(ProbeState { system, disks })),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeState {
    fn read(&mut self) -> Result<ResourceMetrics, ProbeError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh();

        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return Err(ProbeError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }

        let cpu_percent = self.system.global_cpu_info().cpu_usage() as f64;
        let memory_percent = self.system.used_memory() as f64 / total_memory as f64 * 100.0;
        let disk_percent = self.disk_percent()?;

        Ok(ResourceMetrics {
            cpu_percent,
            memory_percent,
            memory_available_bytes: self.system.available_memory(),
            disk_percent,
            timestamp: Utc::now(),
        })
    }

    /// Root filesystem usage, falling back to all disks combined
    fn disk_percent(&self) -> Result<f64, ProbeError> {
        let list = self.disks.list();
        let (total, available) = list
            .iter()
            .find(|disk| disk.mount_point().to_str() == Some("/"))
            .map(|disk| (disk.total_space(), disk.available_space()))
            .unwrap_or_else(|| {
                list.iter().fold((0, 0), |(t, a), disk| {
                    (t + disk.total_space(), a + disk.available_space())
                })
            });

        if total == 0 {
            return Err(ProbeError::Unavailable("no disks reported".to_string()));
        }

        Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
    }
}

#[async_trait]
impl MetricsGateway for SystemProbe {
    async fn sample(&self) -> Result<ResourceMetrics> {
        let state = Arc::clone(&self.state);
        let metrics = tokio::task::spawn_blocking(move || state.lock().read())
            .await
            .map_err(ProbeError::from)??;

        debug!(
            cpu = metrics.cpu_percent,
            memory = metrics.memory_percent,
            disk = metrics.disk_percent,
            "Sampled host utilization"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_reports_percentages_in_range() {
        let probe = SystemProbe::new();

        // Containers without disks legitimately fail; only check bounds on success
        if let Ok(metrics) = probe.sample().await {
            assert!((0.0..=100.0).contains(&metrics.memory_percent));
            assert!((0.0..=100.0).contains(&metrics.disk_percent));
            assert!(metrics.cpu_percent >= 0.0);
        }
    }
}
