//! Autonomic health management
//!
//! This crate provides the core functionality for:
//! - Resource monitoring with state classification and task admission
//! - Trend, anomaly and exhaustion analysis over metric time series
//! - Dependency-graph-based root-cause diagnosis
//! - A monitor, detect, remediate healing loop
//! - Health checks and observability

pub mod diagnosis;
pub mod error;
pub mod gateway;
pub mod healing;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod system;
pub mod trend;

mod ticker;

pub use error::{DiagnosisError, HealingFault, ProbeError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use system::{AutonomicConfig, AutonomicSystem};
