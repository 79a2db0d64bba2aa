//! Error types for the health subsystem

use thiserror::Error;

/// Errors raised by the OS metrics probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("metrics probe unavailable: {0}")]
    Unavailable(String),

    #[error("metrics probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised by the root-cause engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagnosisError {
    #[error("failure not found: {0}")]
    FailureNotFound(String),
}

/// Faults isolated by the healing loop. These are reported through alerts
/// and never abort a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealingFault {
    #[error("monitor '{monitor}' failed: {message}")]
    MonitorFault { monitor: String, message: String },

    #[error("remediation for '{issue_type}' failed: {message}")]
    RemediationFault { issue_type: String, message: String },
}

impl HealingFault {
    pub fn source_name(&self) -> &str {
        match self {
            HealingFault::MonitorFault { monitor, .. } => monitor,
            HealingFault::RemediationFault { issue_type, .. } => issue_type,
        }
    }
}
