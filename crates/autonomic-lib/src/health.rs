//! Component health tracking
//!
//! Each subsystem reports its own status here. The agent exposes the
//! aggregate through its liveness and readiness endpoints. Updates come from
//! synchronous callbacks (state transitions, healing cycles), so the registry
//! uses blocking locks that are only ever held for a map insert or clone.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is under pressure but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Aggregate health across all registered components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status wins
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const RESOURCE_MONITOR: &str = "resource_monitor";
    pub const TREND_ANALYZER: &str = "trend_analyzer";
    pub const DIAGNOSIS_ENGINE: &str = "diagnosis_engine";
    pub const HEALING_LOOP: &str = "healing_loop";
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy());
    }

    pub fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().insert(name.to_string(), health);
    }

    pub fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy());
    }

    pub fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message));
    }

    pub fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message));
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().get(name).cloned()
    }

    pub fn health(&self) -> HealthResponse {
        let components = self.components.read().clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("System not yet started".to_string()),
            };
        }

        if !self.health().status.is_operational() {
            return ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            };
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health();

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[test]
    fn test_health_registry_component_registration() {
        let registry = HealthRegistry::new();
        registry.register(components::RESOURCE_MONITOR);

        let health = registry.health();
        assert_eq!(
            health.components[components::RESOURCE_MONITOR].status,
            ComponentStatus::Healthy
        );
    }

    #[test]
    fn test_health_registry_degraded_status() {
        let registry = HealthRegistry::new();
        registry.register(components::RESOURCE_MONITOR);
        registry.register(components::HEALING_LOOP);

        registry.set_degraded(components::RESOURCE_MONITOR, "Resource state critical");

        assert_eq!(registry.health().status, ComponentStatus::Degraded);
    }

    #[test]
    fn test_health_registry_unhealthy_status() {
        let registry = HealthRegistry::new();
        registry.register(components::RESOURCE_MONITOR);
        registry.register(components::HEALING_LOOP);

        registry.set_unhealthy(components::HEALING_LOOP, "Monitor fault");

        assert_eq!(registry.health().status, ComponentStatus::Unhealthy);
        assert!(!ComponentStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_readiness_transitions() {
        let registry = HealthRegistry::new();
        registry.register(components::TREND_ANALYZER);

        let readiness = registry.readiness();
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true);
        assert!(registry.readiness().ready);

        registry.set_unhealthy(components::TREND_ANALYZER, "Failed");
        assert!(!registry.readiness().ready);

        registry.set_healthy(components::TREND_ANALYZER);
        assert!(registry.readiness().ready);
    }
}
