//! Root-cause analysis over recorded component failures
//!
//! Given a failure, the engine collects other failures recorded shortly
//! before it, keeps those raised by components the failing component
//! (transitively) depends on, and orders them into a causal chain ending at
//! the analyzed failure.
//!
//! The causality filter uses the full transitive dependency set, so a
//! correlated failure on any upstream branch counts as causal even when no
//! failure was recorded on the components in between. With wide fan-in this
//! can attribute blame to an unrelated branch.

use super::graph::{Component, ComponentType, DependencyGraph};
use crate::error::DiagnosisError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the root-cause engine
#[derive(Debug, Clone)]
pub struct DiagnosisConfig {
    /// Failures this close before the target are correlated (default: 5 minutes)
    pub correlation_window: Duration,
    /// Failures retained for correlation (default: 1000)
    pub history_capacity: usize,
    /// Look-back used by component health (default: 1 hour)
    pub health_window: Duration,
    /// More failures than this within the health window is unhealthy (default: 3)
    pub unhealthy_threshold: usize,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            correlation_window: Duration::from_secs(5 * 60),
            history_capacity: 1000,
            health_window: Duration::from_secs(60 * 60),
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    Crash,
    Timeout,
    Overload,
    Error,
    Degradation,
    Unavailable,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureType::Crash => "crash",
            FailureType::Timeout => "timeout",
            FailureType::Overload => "overload",
            FailureType::Error => "error",
            FailureType::Degradation => "degradation",
            FailureType::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// An observed component failure. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub id: String,
    pub component_id: String,
    pub failure_type: FailureType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub symptoms: Vec<String>,
}

impl Failure {
    pub fn new(
        id: impl Into<String>,
        component_id: impl Into<String>,
        failure_type: FailureType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            component_id: component_id.into(),
            failure_type,
            timestamp: Utc::now(),
            description: description.into(),
            metrics: BTreeMap::new(),
            symptoms: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: BTreeMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_symptoms(mut self, symptoms: Vec<String>) -> Self {
        self.symptoms = symptoms;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One step of a causal chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalLink {
    pub component_id: String,
    pub failure_type: FailureType,
    pub failure_id: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Failure> for CausalLink {
    fn from(failure: &Failure) -> Self {
        Self {
            component_id: failure.component_id.clone(),
            failure_type: failure.failure_type,
            failure_id: failure.id.clone(),
            timestamp: failure.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCauseAnalysis {
    pub failure_id: String,
    pub root_causes: Vec<String>,
    /// Ordered by time, ending with the analyzed failure
    pub causal_chain: Vec<CausalLink>,
    pub correlated_failures: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
    pub supporting_evidence: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealthReport {
    pub component_id: String,
    pub registered: bool,
    pub recent_failures: usize,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Dependency-graph-based failure diagnosis
pub struct RootCauseEngine {
    config: DiagnosisConfig,
    graph: RwLock<DependencyGraph>,
    failures: RwLock<VecDeque<Failure>>,
    cache: RwLock<HashMap<String, RootCauseAnalysis>>,
    /// Bumped on every failure or graph change, under the cache write lock
    generation: AtomicU64,
}

impl RootCauseEngine {
    pub fn new(config: DiagnosisConfig) -> Self {
        Self {
            graph: RwLock::new(DependencyGraph::new()),
            failures: RwLock::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &DiagnosisConfig {
        &self.config
    }

    fn invalidate(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        cache.clear();
    }

    pub fn add_component(
        &self,
        id: impl Into<String>,
        component_type: ComponentType,
        name: impl Into<String>,
    ) {
        self.graph.write().add_component(id, component_type, name);
        self.invalidate();
    }

    /// Register a component together with its (already registered) dependencies
    pub fn register_component(
        &self,
        id: &str,
        component_type: ComponentType,
        name: &str,
        dependencies: &[&str],
    ) {
        let mut graph = self.graph.write();
        graph.add_component(id, component_type, name);
        for dependency in dependencies {
            graph.add_dependency(id, dependency);
        }
        drop(graph);

        self.invalidate();
        debug!(component = %id, kind = %component_type, "Component registered");
    }

    pub fn add_dependency(&self, from: &str, to: &str) -> bool {
        let added = self.graph.write().add_dependency(from, to);
        if added {
            self.invalidate();
        }
        added
    }

    pub fn component(&self, id: &str) -> Option<Component> {
        self.graph.read().component(id).cloned()
    }

    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.graph.read().dependencies(id)
    }

    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.graph.read().dependents(id)
    }

    pub fn all_dependencies(&self, id: &str) -> Vec<String> {
        self.graph.read().all_dependencies(id)
    }

    pub fn all_dependents(&self, id: &str) -> Vec<String> {
        self.graph.read().all_dependents(id)
    }

    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        self.graph.read().find_path(from, to)
    }

    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        self.graph.read().detect_cycles()
    }

    /// Components that would be affected if `id` failed
    pub fn impact(&self, id: &str) -> Vec<String> {
        self.all_dependents(id)
    }

    /// Record a failure observed now
    pub fn record_failure(
        &self,
        id: impl Into<String>,
        component_id: impl Into<String>,
        failure_type: FailureType,
        description: impl Into<String>,
    ) -> Failure {
        self.record(Failure::new(id, component_id, failure_type, description))
    }

    /// Record a fully specified failure. No deduplication is performed.
    pub fn record(&self, failure: Failure) -> Failure {
        info!(
            failure_id = %failure.id,
            component = %failure.component_id,
            failure_type = %failure.failure_type,
            "Failure recorded"
        );

        let mut failures = self.failures.write();
        failures.push_back(failure.clone());
        while failures.len() > self.config.history_capacity {
            failures.pop_front();
        }
        drop(failures);

        self.invalidate();
        failure
    }

    /// Most recently recorded failure with this id
    pub fn failure(&self, id: &str) -> Option<Failure> {
        self.failures.read().iter().rev().find(|f| f.id == id).cloned()
    }

    /// Most recent `limit` failures, oldest first
    pub fn failure_history(&self, limit: usize) -> Vec<Failure> {
        let failures = self.failures.read();
        let skip = failures.len().saturating_sub(limit);
        failures.iter().skip(skip).cloned().collect()
    }

    /// Analyze a recorded failure. Results are cached until the next
    /// failure or graph change.
    pub fn analyze(&self, failure_id: &str) -> Result<RootCauseAnalysis, DiagnosisError> {
        if let Some(cached) = self.cache.read().get(failure_id) {
            return Ok(cached.clone());
        }

        let generation = self.generation.load(Ordering::SeqCst);

        let (target, correlated) = {
            let failures = self.failures.read();
            let position = failures
                .iter()
                .rposition(|f| f.id == failure_id)
                .ok_or_else(|| DiagnosisError::FailureNotFound(failure_id.to_string()))?;
            let target = failures[position].clone();
            let correlated = self.correlated_failures(&failures, position);
            (target, correlated)
        };

        let graph = self.graph.read();
        let upstream: HashSet<String> = graph
            .all_dependencies(&target.component_id)
            .into_iter()
            .collect();

        let mut causal: Vec<&Failure> = correlated
            .iter()
            .filter(|f| upstream.contains(&f.component_id))
            .collect();
        causal.sort_by_key(|f| f.timestamp);

        let mut causal_chain: Vec<CausalLink> =
            causal.iter().map(|f| CausalLink::from(*f)).collect();
        causal_chain.push(CausalLink::from(&target));

        let root_causes = select_root_causes(&graph, &causal_chain);
        let confidence = score_confidence(&correlated, &causal_chain, &target);

        let explanation = explain(&target, &root_causes, &correlated, &causal_chain, &self.config);
        let supporting_evidence = gather_evidence(&target, &correlated, &upstream);
        let recommended_actions = recommend(&graph, &target, &root_causes);
        drop(graph);

        let analysis = RootCauseAnalysis {
            failure_id: target.id.clone(),
            root_causes,
            causal_chain,
            correlated_failures: correlated.iter().map(|f| f.id.clone()).collect(),
            confidence,
            explanation,
            supporting_evidence,
            recommended_actions,
            analyzed_at: Utc::now(),
        };

        info!(
            failure_id = %analysis.failure_id,
            root_causes = ?analysis.root_causes,
            chain_len = analysis.causal_chain.len(),
            confidence = analysis.confidence,
            "Root cause analysis complete"
        );

        // A failure or graph change during the computation makes this result stale
        let mut cache = self.cache.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            cache.insert(failure_id.to_string(), analysis.clone());
        }
        Ok(analysis)
    }

    /// Every other entry at or before the target, within the correlation
    /// window, newest first
    fn correlated_failures(&self, failures: &VecDeque<Failure>, target: usize) -> Vec<Failure> {
        let window = chrono::Duration::from_std(self.config.correlation_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let at = failures[target].timestamp;
        let earliest = at - window;

        failures
            .iter()
            .enumerate()
            .rev()
            .filter(|(index, _)| *index != target)
            .map(|(_, f)| f)
            .filter(|f| f.timestamp <= at && f.timestamp >= earliest)
            .cloned()
            .collect()
    }

    pub fn component_health(&self, id: &str) -> ComponentHealthReport {
        let window = chrono::Duration::from_std(self.config.health_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let since = Utc::now() - window;

        let failures = self.failures.read();
        let recent: Vec<&Failure> = failures
            .iter()
            .filter(|f| f.component_id == id && f.timestamp >= since)
            .collect();

        ComponentHealthReport {
            component_id: id.to_string(),
            registered: self.graph.read().contains(id),
            recent_failures: recent.len(),
            healthy: recent.len() <= self.config.unhealthy_threshold,
            last_failure_at: recent.iter().map(|f| f.timestamp).max(),
        }
    }
}

impl Default for RootCauseEngine {
    fn default() -> Self {
        Self::new(DiagnosisConfig::default())
    }
}

/// The earliest chain component, plus every chain component with no
/// dependencies of its own
fn select_root_causes(graph: &DependencyGraph, chain: &[CausalLink]) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();

    if let Some(first) = chain.first() {
        roots.push(first.component_id.clone());
    }

    for link in chain {
        let is_leaf = graph
            .component(&link.component_id)
            .map(|c| c.dependencies.is_empty())
            .unwrap_or(true);
        if is_leaf && !roots.contains(&link.component_id) {
            roots.push(link.component_id.clone());
        }
    }

    roots
}

fn score_confidence(correlated: &[Failure], chain: &[CausalLink], target: &Failure) -> f64 {
    let mut confidence: f64 = 0.5;
    if !correlated.is_empty() {
        confidence += 0.2;
    }
    if chain.len() > 1 {
        confidence += 0.2;
    }
    if !target.metrics.is_empty() {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

fn explain(
    target: &Failure,
    root_causes: &[String],
    correlated: &[Failure],
    chain: &[CausalLink],
    config: &DiagnosisConfig,
) -> String {
    if chain.len() > 1 {
        let path: Vec<&str> = chain.iter().map(|l| l.component_id.as_str()).collect();
        format!(
            "{} failure of {} most likely originated in {}. {} failure(s) occurred \
             within {}s before it, {} of them upstream along the dependency graph: {}",
            target.failure_type,
            target.component_id,
            root_causes.join(", "),
            correlated.len(),
            config.correlation_window.as_secs(),
            chain.len() - 1,
            path.join(" -> ")
        )
    } else if correlated.is_empty() {
        format!(
            "{} failure of {} has no correlated failures; it is the most likely origin",
            target.failure_type, target.component_id
        )
    } else {
        format!(
            "{} failure of {} coincided with {} failure(s) on components it does not \
             depend on; treating it as the origin",
            target.failure_type,
            target.component_id,
            correlated.len()
        )
    }
}

fn gather_evidence(
    target: &Failure,
    correlated: &[Failure],
    upstream: &HashSet<String>,
) -> Vec<String> {
    let mut evidence = Vec::new();

    for failure in correlated.iter().rev() {
        let relation = if upstream.contains(&failure.component_id) {
            "Upstream"
        } else {
            "Unrelated"
        };
        evidence.push(format!(
            "{} {} on {} at {}: {}",
            relation,
            failure.failure_type,
            failure.component_id,
            failure.timestamp.to_rfc3339(),
            failure.description
        ));
    }

    for (name, value) in &target.metrics {
        evidence.push(format!("Metric {} = {:.2} at failure time", name, value));
    }
    for symptom in &target.symptoms {
        evidence.push(format!("Symptom: {}", symptom));
    }

    evidence
}

fn recommend(graph: &DependencyGraph, target: &Failure, root_causes: &[String]) -> Vec<String> {
    let mut actions: Vec<String> = Vec::new();
    let mut push = |action: String| {
        if !actions.contains(&action) {
            actions.push(action);
        }
    };

    for root in root_causes {
        let Some(component) = graph.component(root) else {
            continue;
        };
        let templates: &[&str] = match component.component_type {
            ComponentType::Database => &[
                "Check database connectivity and connection pool saturation",
                "Review slow query logs and lock contention",
            ],
            ComponentType::Service => &[
                "Restart the affected service instance",
                "Review recent deployments and service logs",
            ],
            ComponentType::Network => &[
                "Verify network connectivity, DNS and firewall rules",
                "Check for packet loss or latency between hosts",
            ],
            _ => &[],
        };
        for template in templates {
            push(format!("{} ({})", template, component.id));
        }
    }

    match target.failure_type {
        FailureType::Overload => {
            push("Scale out capacity or enable load shedding".to_string());
        }
        FailureType::Timeout => {
            push("Review timeout settings and add deadlines to dependent calls".to_string());
        }
        _ => {}
    }

    let watched = if root_causes.is_empty() {
        target.component_id.clone()
    } else {
        root_causes.join(", ")
    };
    push(format!("Add monitoring and alerting for {}", watched));

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    /// web depends on cache depends on db
    fn chain_engine() -> RootCauseEngine {
        let engine = RootCauseEngine::default();
        engine.register_component("db", ComponentType::Database, "Postgres", &[]);
        engine.register_component("cache", ComponentType::Cache, "Redis", &["db"]);
        engine.register_component("web", ComponentType::Service, "Frontend", &["cache"]);
        engine
    }

    fn record_at(engine: &RootCauseEngine, id: &str, component: &str, t: DateTime<Utc>) {
        engine.record(
            Failure::new(id, component, FailureType::Error, format!("{} failed", component)).at(t),
        );
    }

    #[test]
    fn test_chain_root_cause() {
        let engine = chain_engine();
        let t0 = Utc::now() - chrono::Duration::seconds(10);

        record_at(&engine, "f-db", "db", t0);
        record_at(&engine, "f-cache", "cache", t0 + chrono::Duration::milliseconds(100));
        record_at(&engine, "f-web", "web", t0 + chrono::Duration::milliseconds(200));

        let analysis = engine.analyze("f-web").unwrap();

        assert!(analysis.root_causes.contains(&"db".to_string()));
        assert!(analysis.causal_chain.len() >= 2);
        let components: Vec<&str> = analysis
            .causal_chain
            .iter()
            .map(|l| l.component_id.as_str())
            .collect();
        assert_eq!(components, vec!["db", "cache", "web"]);
        assert!((analysis.confidence - 0.9).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&analysis.confidence));
        assert!(analysis
            .recommended_actions
            .iter()
            .any(|a| a.contains("connection pool")));
        assert!(analysis
            .recommended_actions
            .last()
            .unwrap()
            .starts_with("Add monitoring"));
    }

    #[test]
    fn test_unknown_failure_is_not_found() {
        let engine = chain_engine();
        assert_eq!(
            engine.analyze("nope"),
            Err(DiagnosisError::FailureNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_isolated_failure_is_its_own_root() {
        let engine = chain_engine();
        let failure = engine.record(
            Failure::new("f1", "web", FailureType::Overload, "queue full")
                .with_metrics(BTreeMap::from([("cpu".to_string(), 99.0)])),
        );

        let analysis = engine.analyze(&failure.id).unwrap();

        assert_eq!(analysis.root_causes, vec!["web"]);
        assert_eq!(analysis.causal_chain.len(), 1);
        assert!((analysis.confidence - 0.6).abs() < 1e-9);
        assert!(analysis
            .recommended_actions
            .iter()
            .any(|a| a.contains("load shedding")));
        assert!(analysis
            .supporting_evidence
            .iter()
            .any(|e| e.contains("Metric cpu")));
    }

    #[test]
    fn test_correlation_window_and_ordering() {
        let engine = chain_engine();
        let now = Utc::now();

        // Too old
        record_at(&engine, "old-db", "db", now - chrono::Duration::minutes(10));
        // After the target
        record_at(&engine, "late-cache", "cache", now + chrono::Duration::seconds(1));
        record_at(&engine, "f-web", "web", now);

        let analysis = engine.analyze("f-web").unwrap();
        assert_eq!(analysis.causal_chain.len(), 1);
        assert!(analysis.correlated_failures.is_empty());
        assert!((analysis.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_downstream_failures_are_not_causal() {
        let engine = chain_engine();
        let now = Utc::now();

        record_at(&engine, "f-web", "web", now - chrono::Duration::seconds(5));
        record_at(&engine, "f-db", "db", now);

        let analysis = engine.analyze("f-db").unwrap();
        assert_eq!(analysis.correlated_failures, vec!["f-web"]);
        assert_eq!(analysis.causal_chain.len(), 1);
        assert_eq!(analysis.root_causes, vec!["db"]);
        assert!((analysis.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_cache_invalidated_by_new_failures() {
        let engine = chain_engine();
        let now = Utc::now();
        record_at(&engine, "f-web", "web", now);

        let first = engine.analyze("f-web").unwrap();
        let again = engine.analyze("f-web").unwrap();
        assert_eq!(first, again);

        record_at(&engine, "f-cache", "cache", now - chrono::Duration::seconds(1));
        let updated = engine.analyze("f-web").unwrap();
        assert_eq!(updated.causal_chain.len(), 2);
        assert_eq!(updated.root_causes, vec!["cache"]);
    }

    #[test]
    fn test_concurrent_record_never_leaves_stale_cache() {
        use std::sync::Arc;
        use std::thread;

        for round in 0..200 {
            let engine = Arc::new(chain_engine());
            let now = Utc::now();
            record_at(&engine, "f-web", "web", now);

            let reader = {
                let engine = engine.clone();
                thread::spawn(move || engine.analyze("f-web").map(|a| a.causal_chain.len()))
            };
            let writer = {
                let engine = engine.clone();
                thread::spawn(move || {
                    record_at(&engine, "f-db", "db", now - chrono::Duration::seconds(1))
                })
            };
            assert!(reader.join().unwrap().is_ok());
            writer.join().unwrap();

            let analysis = engine.analyze("f-web").unwrap();
            assert_eq!(analysis.causal_chain.len(), 2, "round {}", round);
            assert_eq!(analysis.root_causes, vec!["db"]);
        }
    }

    #[test]
    fn test_reused_id_analyzes_latest_failure() {
        let engine = chain_engine();
        let now = Utc::now();

        record_at(&engine, "f-1", "db", now - chrono::Duration::seconds(2));
        record_at(&engine, "f-1", "web", now);

        assert_eq!(engine.failure("f-1").unwrap().component_id, "web");

        let analysis = engine.analyze("f-1").unwrap();
        assert_eq!(analysis.correlated_failures, vec!["f-1"]);
        let components: Vec<&str> = analysis
            .causal_chain
            .iter()
            .map(|l| l.component_id.as_str())
            .collect();
        assert_eq!(components, vec!["db", "web"]);
    }

    #[test]
    fn test_history_is_bounded() {
        let engine = RootCauseEngine::new(DiagnosisConfig {
            history_capacity: 3,
            ..Default::default()
        });
        for i in 0..5 {
            engine.record_failure(format!("f{}", i), "svc", FailureType::Crash, "down");
        }

        let history = engine.failure_history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, "f2");
        assert!(matches!(
            engine.analyze("f0"),
            Err(DiagnosisError::FailureNotFound(_))
        ));
    }

    #[test]
    fn test_component_health() {
        let engine = chain_engine();
        for i in 0..3 {
            engine.record_failure(format!("f{}", i), "cache", FailureType::Timeout, "slow");
        }

        let health = engine.component_health("cache");
        assert_eq!(health.recent_failures, 3);
        assert!(health.healthy);
        assert!(health.registered);

        engine.record_failure("f3", "cache", FailureType::Timeout, "slow");
        assert!(!engine.component_health("cache").healthy);
        assert!(engine.component_health("db").healthy);
    }

    #[test]
    fn test_impact_and_unknown_dependency() {
        let engine = chain_engine();
        assert!(!engine.add_dependency("web", "ghost"));

        let impact = engine.impact("db");
        assert_eq!(impact, vec!["cache", "web"]);
    }
}
