//! Component dependency graph
//!
//! Edges point from a component to what it depends on. Every edge is stored
//! on both endpoints (`dependencies` on the source, `dependents` on the
//! target). All traversals are iterative.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::warn;

/// Kind of component in the dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Service,
    Database,
    Cache,
    Queue,
    Api,
    Worker,
    Network,
    Storage,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentType::Service => "service",
            ComponentType::Database => "database",
            ComponentType::Cache => "cache",
            ComponentType::Queue => "queue",
            ComponentType::Api => "api",
            ComponentType::Worker => "worker",
            ComponentType::Network => "network",
            ComponentType::Storage => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub component_type: ComponentType,
    pub dependencies: BTreeSet<String>,
    pub dependents: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Dependencies,
    Dependents,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    components: HashMap<String, Component>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Re-registering updates name and type but keeps edges.
    pub fn add_component(
        &mut self,
        id: impl Into<String>,
        component_type: ComponentType,
        name: impl Into<String>,
    ) {
        let id = id.into();
        let name = name.into();

        match self.components.get_mut(&id) {
            Some(existing) => {
                existing.name = name;
                existing.component_type = component_type;
            }
            None => {
                self.components.insert(
                    id.clone(),
                    Component {
                        id,
                        name,
                        component_type,
                        dependencies: BTreeSet::new(),
                        dependents: BTreeSet::new(),
                    },
                );
            }
        }
    }

    /// Record that `from` depends on `to`. Unknown endpoints and self edges
    /// are ignored with a warning.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> bool {
        if !self.components.contains_key(from) || !self.components.contains_key(to) {
            warn!(
                from = %from,
                to = %to,
                "Ignoring dependency with unregistered endpoint"
            );
            return false;
        }
        if from == to {
            warn!(component = %from, "Ignoring self dependency");
            return false;
        }

        if let Some(source) = self.components.get_mut(from) {
            source.dependencies.insert(to.to_string());
        }
        if let Some(target) = self.components.get_mut(to) {
            target.dependents.insert(from.to_string());
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.components.contains_key(id)
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    fn edges(&self, id: &str, direction: Direction) -> Option<&BTreeSet<String>> {
        self.components.get(id).map(|c| match direction {
            Direction::Dependencies => &c.dependencies,
            Direction::Dependents => &c.dependents,
        })
    }

    /// Direct dependencies
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.edges(id, Direction::Dependencies)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.edges(id, Direction::Dependents)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Transitive dependencies in breadth-first order, excluding `id`
    pub fn all_dependencies(&self, id: &str) -> Vec<String> {
        self.reachable(id, Direction::Dependencies)
    }

    /// Transitive dependents in breadth-first order, excluding `id`
    pub fn all_dependents(&self, id: &str) -> Vec<String> {
        self.reachable(id, Direction::Dependents)
    }

    fn reachable(&self, start: &str, direction: Direction) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        let mut order = Vec::new();

        while let Some(current) = queue.pop_front() {
            let Some(edges) = self.edges(current, direction) else {
                continue;
            };
            for next in edges {
                if visited.insert(next.as_str()) {
                    order.push(next.clone());
                    queue.push_back(next.as_str());
                }
            }
        }

        order
    }

    /// Shortest path from `from` to `to` following dependency edges,
    /// both endpoints included. `from == to` yields a single-element path.
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            let Some(edges) = self.edges(current, Direction::Dependencies) else {
                continue;
            };
            for next in edges {
                let next = next.as_str();
                if !visited.insert(next) {
                    continue;
                }
                parents.insert(next, current);

                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(&parent) = parents.get(cursor) {
                        path.push(parent.to_string());
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// Every dependency cycle found by a depth-first sweep. Each cycle is
    /// reported as a path that starts and ends on the same component.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut roots: Vec<&str> = self.components.keys().map(String::as_str).collect();
        roots.sort_unstable();

        let mut visits: HashMap<&str, Visit> = HashMap::new();
        let mut cycles = Vec::new();

        for root in roots {
            if visits.contains_key(root) {
                continue;
            }

            visits.insert(root, Visit::InProgress);
            let mut stack: Vec<(&str, Vec<&str>)> = vec![(root, self.pending_edges(root))];

            loop {
                let next = match stack.last_mut() {
                    Some((_, pending)) => pending.pop(),
                    None => break,
                };

                match next {
                    Some(next) => match visits.get(next) {
                        None => {
                            visits.insert(next, Visit::InProgress);
                            stack.push((next, self.pending_edges(next)));
                        }
                        Some(Visit::InProgress) => {
                            let start = stack
                                .iter()
                                .position(|(node, _)| *node == next)
                                .unwrap_or(0);
                            let mut cycle: Vec<String> =
                                stack[start..].iter().map(|(node, _)| node.to_string()).collect();
                            cycle.push(next.to_string());
                            cycles.push(cycle);
                        }
                        Some(Visit::Done) => {}
                    },
                    None => {
                        if let Some((node, _)) = stack.pop() {
                            visits.insert(node, Visit::Done);
                        }
                    }
                }
            }
        }

        cycles
    }

    /// Dependencies in reverse order so popping visits them ascending
    fn pending_edges(&self, id: &str) -> Vec<&str> {
        self.edges(id, Direction::Dependencies)
            .map(|set| set.iter().rev().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// web -> cache -> db, web -> api -> db
    fn sample_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_component("db", ComponentType::Database, "Postgres");
        graph.add_component("cache", ComponentType::Cache, "Redis");
        graph.add_component("api", ComponentType::Api, "Backend API");
        graph.add_component("web", ComponentType::Service, "Web frontend");

        assert!(graph.add_dependency("cache", "db"));
        assert!(graph.add_dependency("api", "db"));
        assert!(graph.add_dependency("web", "cache"));
        assert!(graph.add_dependency("web", "api"));
        graph
    }

    #[test]
    fn test_edges_are_bidirectional() {
        let graph = sample_graph();

        assert_eq!(graph.dependencies("web"), vec!["api", "cache"]);
        assert_eq!(graph.dependents("db"), vec!["api", "cache"]);
        for component in graph.components() {
            for dep in &component.dependencies {
                assert!(graph.component(dep).unwrap().dependents.contains(&component.id));
            }
        }
    }

    #[test]
    fn test_unknown_endpoint_is_noop() {
        let mut graph = sample_graph();

        assert!(!graph.add_dependency("web", "ghost"));
        assert!(!graph.add_dependency("ghost", "db"));
        assert!(!graph.add_dependency("db", "db"));
        assert!(!graph.contains("ghost"));
        assert_eq!(graph.dependencies("web").len(), 2);
    }

    #[test]
    fn test_transitive_closure_excludes_self() {
        let graph = sample_graph();

        let deps = graph.all_dependencies("web");
        assert_eq!(deps.len(), 3);
        assert!(!deps.contains(&"web".to_string()));
        assert_eq!(deps.last().map(String::as_str), Some("db"));

        let dependents = graph.all_dependents("db");
        assert_eq!(dependents.len(), 3);
        assert!(!dependents.contains(&"db".to_string()));

        assert!(graph.all_dependencies("db").is_empty());
        assert!(graph.all_dependencies("ghost").is_empty());
    }

    #[test]
    fn test_closure_terminates_on_cycle() {
        let mut graph = sample_graph();
        graph.add_dependency("db", "web");

        let deps = graph.all_dependencies("web");
        assert_eq!(deps.len(), 3);
        assert!(!deps.contains(&"web".to_string()));
    }

    #[test]
    fn test_find_path() {
        let graph = sample_graph();

        let path = graph.find_path("web", "db").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first().map(String::as_str), Some("web"));
        assert_eq!(path.last().map(String::as_str), Some("db"));

        assert_eq!(graph.find_path("db", "db"), Some(vec!["db".to_string()]));
        assert_eq!(graph.find_path("db", "web"), None);
        assert_eq!(graph.find_path("web", "ghost"), None);
    }

    #[test]
    fn test_detect_cycles() {
        let mut graph = sample_graph();
        assert!(graph.detect_cycles().is_empty());

        graph.add_dependency("db", "web");
        let cycles = graph.detect_cycles();

        assert!(!cycles.is_empty());
        for cycle in &cycles {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"db".to_string()));
        }
    }

    #[test]
    fn test_reregister_keeps_edges() {
        let mut graph = sample_graph();
        graph.add_component("db", ComponentType::Storage, "Object store");

        let db = graph.component("db").unwrap();
        assert_eq!(db.component_type, ComponentType::Storage);
        assert_eq!(db.dependents.len(), 2);
    }
}
