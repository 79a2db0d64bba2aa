//! Failure diagnosis over a component dependency graph

mod engine;
mod graph;

pub use engine::{
    CausalLink, ComponentHealthReport, DiagnosisConfig, Failure, FailureType, RootCauseAnalysis,
    RootCauseEngine,
};
pub use graph::{Component, ComponentType, DependencyGraph};
