//! End-to-end scenarios across the monitor, trend analyzer, diagnosis and
//! healing engines

use autonomic_lib::diagnosis::{ComponentType, Failure, FailureType};
use autonomic_lib::gateway::{async_trait, MetricsGateway};
use autonomic_lib::healing::HealingIntegration;
use autonomic_lib::monitor::ResourceMonitor;
use autonomic_lib::trend::PredictionKind;
use autonomic_lib::{
    AutonomicConfig, AutonomicSystem, MetricType, ResourceMetrics, ResourceState, TaskPriority,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Replays a fixed script of samples, repeating the last one
struct ScriptedGateway {
    samples: Mutex<VecDeque<ResourceMetrics>>,
    last: Mutex<ResourceMetrics>,
}

impl ScriptedGateway {
    fn new(samples: Vec<ResourceMetrics>) -> Self {
        let last = samples
            .last()
            .cloned()
            .unwrap_or_else(ResourceMetrics::unavailable);
        Self {
            samples: Mutex::new(samples.into()),
            last: Mutex::new(last),
        }
    }
}

#[async_trait]
impl MetricsGateway for ScriptedGateway {
    async fn sample(&self) -> anyhow::Result<ResourceMetrics> {
        let next = self.samples.lock().pop_front();
        match next {
            Some(sample) => {
                *self.last.lock() = sample.clone();
                Ok(sample)
            }
            None => Ok(self.last.lock().clone()),
        }
    }
}

fn system(samples: Vec<ResourceMetrics>) -> AutonomicSystem {
    let gateway = Arc::new(ScriptedGateway::new(samples));
    AutonomicSystem::new(gateway, AutonomicConfig::default(), "e2e").unwrap()
}

#[tokio::test]
async fn emergency_sample_gates_work_and_heals() {
    let system = system(vec![ResourceMetrics::new(96.0, 50.0, 30.0)]);
    let monitor = system.monitor();

    let metrics = monitor.collect().await;
    assert_eq!(ResourceMonitor::classify(&metrics), ResourceState::Emergency);

    monitor.poll_once().await;
    assert_eq!(monitor.current_state(), ResourceState::Emergency);
    assert!(!monitor.should_execute(TaskPriority::Low));
    assert!(monitor.should_execute(TaskPriority::Critical));
    assert_eq!(monitor.recommended_batch_size(100), 25);
    assert!(monitor.is_throttled());

    let actions = system.healing().run_cycle().await;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].issue_type, HealingIntegration::RESOURCE_EMERGENCY);
    assert_eq!(system.healing().metrics().successful_remediations, 1);
}

#[tokio::test]
async fn recovery_releases_throttle() {
    let system = system(vec![
        ResourceMetrics::new(97.0, 40.0, 40.0),
        ResourceMetrics::new(85.0, 40.0, 40.0),
        ResourceMetrics::new(30.0, 40.0, 40.0),
    ]);
    let monitor = system.monitor();

    monitor.poll_once().await;
    assert!(monitor.is_throttled());

    // WARNING keeps the throttle until the state relaxes
    assert_eq!(monitor.poll_once().await, ResourceState::Warning);
    assert!(monitor.is_throttled());

    assert_eq!(monitor.poll_once().await, ResourceState::Optimal);
    assert!(!monitor.is_throttled());
    assert!(monitor.should_execute(TaskPriority::Background));

    let stats = monitor.stats().await;
    assert_eq!(stats.state_transitions, 3);
    assert_eq!(stats.throttle_activations, 1);
}

#[tokio::test]
async fn rising_memory_is_forecast_and_suggested() {
    // Memory climbs one point per sample from 70%
    let samples: Vec<ResourceMetrics> = (0..20)
        .map(|i| ResourceMetrics::new(20.0, 70.0 + i as f64, 30.0))
        .collect();
    let system = system(samples);

    for _ in 0..20 {
        system.monitor().poll_once().await;
    }

    let predictions = system.analyzer().current_predictions();
    let forecast = predictions
        .iter()
        .find(|p| p.metric_type == MetricType::MemoryUsage)
        .expect("memory forecast");
    assert_eq!(forecast.kind, PredictionKind::ResourceExhaustion);
    assert!(forecast.predicted_time.is_some());

    system.healing().run_cycle().await;
    let suggestions = system.integration().suggestions();
    assert!(suggestions.iter().any(|s| s.starts_with("[memory_usage]")));
}

#[tokio::test]
async fn cascading_failure_is_traced_to_database() {
    let system = system(vec![ResourceMetrics::new(10.0, 10.0, 10.0)]);
    let diagnosis = system.diagnosis();

    diagnosis.register_component("db", ComponentType::Database, "Postgres", &[]);
    diagnosis.register_component("cache", ComponentType::Cache, "Redis", &["db"]);
    diagnosis.register_component("web", ComponentType::Service, "Frontend", &["cache"]);

    let t0 = Utc::now() - chrono::Duration::seconds(30);
    system.record_failure(Failure::new("f1", "db", FailureType::Unavailable, "db down").at(t0));
    system.record_failure(
        Failure::new("f2", "cache", FailureType::Timeout, "cache timeouts")
            .at(t0 + chrono::Duration::milliseconds(100)),
    );
    system.record_failure(
        Failure::new("f3", "web", FailureType::Error, "5xx spike")
            .at(t0 + chrono::Duration::milliseconds(200)),
    );

    let analysis = system.analyze_failure("f3").unwrap();
    assert!(analysis.root_causes.contains(&"db".to_string()));
    assert!(analysis.causal_chain.len() >= 2);
    assert_eq!(analysis.causal_chain.last().unwrap().failure_id, "f3");
    assert!((0.0..=1.0).contains(&analysis.confidence));

    assert_eq!(diagnosis.impact("db"), vec!["cache", "web"]);
    assert_eq!(
        diagnosis.find_path("web", "db"),
        Some(vec!["web".to_string(), "cache".to_string(), "db".to_string()])
    );
}
