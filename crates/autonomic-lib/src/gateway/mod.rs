//! Host utilization sampling
//!
//! The gateway is the only place that touches the operating system. Everything
//! downstream consumes `ResourceMetrics` and never probes the host directly.

mod system_probe;

pub use system_probe::SystemProbe;

use crate::models::ResourceMetrics;
use anyhow::Result;

pub use async_trait::async_trait;

/// Trait for host metrics sampling implementations
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Take one utilization sample
    async fn sample(&self) -> Result<ResourceMetrics>;
}
