//! # Plugin Dependency Graph
//!
//! A DAG over the loaded plugin set, built from each plugin's declared
//! dependencies and version constraints. The graph is validated at build
//! time (missing targets, constraint violations, cycles) and never mutated:
//! the plugin manager rebuilds it whenever the loaded set changes.
//!
//! The topological order is deterministic: Kahn's algorithm with an ordered
//! ready set, so ties break lexicographically by plugin id. Dependencies
//! always precede their dependents, which is the order plugins are enabled
//! in and the reverse of the order they are shut down in.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use thiserror::Error;

use estateguard_manifest::{Constraint, Version};

/// One declared dependency: the target plugin id and the version constraint
/// the dependent placed on it.
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub dependency: String,
    pub constraint: Constraint,
}

/// Why a graph could not be built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("plugin `{dependent}` depends on `{dependency}`, which is not loaded")]
    MissingDependency { dependent: String, dependency: String },

    #[error(
        "plugin `{dependent}` requires `{dependency}` {required}, but version {actual} is loaded"
    )]
    VersionIncompatibility {
        dependent: String,
        dependency: String,
        required: String,
        actual: String,
    },

    #[error("cyclic plugin dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
}

impl GraphError {
    /// The plugin the error is attributed to. For a cycle that is the
    /// lexicographically first participant, so demotion is deterministic.
    pub fn offender(&self) -> &str {
        match self {
            GraphError::MissingDependency { dependent, .. } => dependent,
            GraphError::VersionIncompatibility { dependent, .. } => dependent,
            GraphError::CyclicDependency { path } => path
                .iter()
                .min()
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }
}

/// The validated dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Version>,
    /// dependent -> its dependencies
    edges: BTreeMap<String, Vec<DependencyEdge>>,
    /// dependency -> plugins that depend on it
    reverse: BTreeMap<String, BTreeSet<String>>,
    topo: Vec<String>,
}

impl DependencyGraph {
    /// Build and validate a graph from the loaded plugin versions and the
    /// declared edges. Edge lists for plugins without dependencies may be
    /// omitted.
    pub fn build(
        nodes: BTreeMap<String, Version>,
        mut edges: BTreeMap<String, Vec<DependencyEdge>>,
    ) -> Result<Self, GraphError> {
        // Edges declared by plugins that are no longer loaded carry no
        // information; the manager re-declares them when the plugin returns.
        edges.retain(|dependent, _| nodes.contains_key(dependent));

        for (dependent, deps) in &edges {
            for edge in deps {
                let actual = nodes.get(&edge.dependency).ok_or_else(|| {
                    GraphError::MissingDependency {
                        dependent: dependent.clone(),
                        dependency: edge.dependency.clone(),
                    }
                })?;
                if !edge.constraint.matches(actual) {
                    return Err(GraphError::VersionIncompatibility {
                        dependent: dependent.clone(),
                        dependency: edge.dependency.clone(),
                        required: edge.constraint.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }

        let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (dependent, deps) in &edges {
            for edge in deps {
                reverse
                    .entry(edge.dependency.clone())
                    .or_default()
                    .insert(dependent.clone());
            }
        }

        let topo = topo_sort(&nodes, &edges, &reverse)?;

        Ok(Self {
            nodes,
            edges,
            reverse,
            topo,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn version_of(&self, id: &str) -> Option<&Version> {
        self.nodes.get(id)
    }

    /// Deterministic load order: every dependency precedes its dependents,
    /// ties broken lexicographically by id.
    pub fn topo_order(&self) -> &[String] {
        &self.topo
    }

    /// Everything `id` transitively depends on, excluding `id` itself.
    pub fn reachable_from(&self, id: &str) -> BTreeSet<String> {
        self.walk(id, |node| {
            self.edges
                .get(node)
                .map(|deps| deps.iter().map(|e| e.dependency.clone()).collect())
                .unwrap_or_default()
        })
    }

    /// Everything that transitively depends on `id`, excluding `id` itself.
    /// These are the plugins at risk when `id` is unloaded or reloaded.
    pub fn dependents_of(&self, id: &str) -> BTreeSet<String> {
        self.walk(id, |node| {
            self.reverse
                .get(node)
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn walk(&self, start: &str, neighbours: impl Fn(&str) -> Vec<String>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = neighbours(start).into();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node.clone()) {
                queue.extend(neighbours(&node));
            }
        }
        seen.remove(start);
        seen
    }
}

fn topo_sort(
    nodes: &BTreeMap<String, Version>,
    edges: &BTreeMap<String, Vec<DependencyEdge>>,
    reverse: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>, GraphError> {
    let mut in_degree: BTreeMap<&str, usize> = nodes
        .keys()
        .map(|id| {
            let deps = edges.get(id).map(Vec::len).unwrap_or(0);
            (id.as_str(), deps)
        })
        .collect();

    // Ordered ready set gives the lexicographic tie-break.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = ready.iter().next().copied() {
        ready.remove(id);
        order.push(id.to_string());
        if let Some(dependents) = reverse.get(id) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    // Some nodes never reached in-degree zero: there is at least one cycle.
    let stuck: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(id, _)| *id)
        .collect();
    Err(GraphError::CyclicDependency {
        path: shortest_cycle(&stuck, edges),
    })
}

/// Find one shortest cycle among the stuck nodes: BFS from each candidate
/// along dependency edges until the start node reappears.
fn shortest_cycle(
    stuck: &BTreeSet<&str>,
    edges: &BTreeMap<String, Vec<DependencyEdge>>,
) -> Vec<String> {
    let mut best: Option<Vec<String>> = None;

    for &start in stuck {
        let mut parents: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(start);

        'bfs: while let Some(node) = queue.pop_front() {
            let Some(deps) = edges.get(node) else { continue };
            for edge in deps {
                let next = edge.dependency.as_str();
                if !stuck.contains(next) {
                    continue;
                }
                if next == start {
                    let mut path = vec![start.to_string()];
                    let mut cursor = node;
                    let mut rev = Vec::new();
                    while cursor != start {
                        rev.push(cursor.to_string());
                        cursor = parents[cursor];
                    }
                    path.extend(rev.into_iter().rev());
                    path.push(start.to_string());
                    let better = match &best {
                        Some(existing) => path.len() < existing.len(),
                        None => true,
                    };
                    if better {
                        best = Some(path);
                    }
                    break 'bfs;
                }
                if !parents.contains_key(next) {
                    parents.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
    }

    best.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> Constraint {
        Constraint::parse(s).unwrap()
    }

    fn edge(dep: &str, constraint: &str) -> DependencyEdge {
        DependencyEdge {
            dependency: dep.to_string(),
            constraint: c(constraint),
        }
    }

    fn nodes(entries: &[(&str, &str)]) -> BTreeMap<String, Version> {
        entries
            .iter()
            .map(|(id, version)| (id.to_string(), v(version)))
            .collect()
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let graph = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-enrich", "1.0.0"),
                ("plugin-processing-normalizer", "1.2.0"),
                ("plugin-detection-price-anomaly", "2.0.0"),
            ]),
            BTreeMap::from([
                (
                    "plugin-processing-enrich".to_string(),
                    vec![edge("plugin-processing-normalizer", "^1.0.0")],
                ),
                (
                    "plugin-detection-price-anomaly".to_string(),
                    vec![edge("plugin-processing-enrich", "*"), ],
                ),
            ]),
        )
        .unwrap();

        let order = graph.topo_order();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("plugin-processing-normalizer") < pos("plugin-processing-enrich"));
        assert!(pos("plugin-processing-enrich") < pos("plugin-detection-price-anomaly"));
    }

    #[test]
    fn independent_nodes_order_lexicographically() {
        let graph = DependencyGraph::build(
            nodes(&[
                ("plugin-source-c", "1.0.0"),
                ("plugin-source-a", "1.0.0"),
                ("plugin-source-b", "1.0.0"),
            ]),
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(
            graph.topo_order(),
            &[
                "plugin-source-a".to_string(),
                "plugin-source-b".to_string(),
                "plugin-source-c".to_string(),
            ]
        );
    }

    #[test]
    fn missing_dependency_is_reported() {
        let err = DependencyGraph::build(
            nodes(&[("plugin-processing-a", "1.0.0")]),
            BTreeMap::from([(
                "plugin-processing-a".to_string(),
                vec![edge("plugin-processing-ghost", "*")],
            )]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                dependent: "plugin-processing-a".into(),
                dependency: "plugin-processing-ghost".into(),
            }
        );
        assert_eq!(err.offender(), "plugin-processing-a");
    }

    #[test]
    fn version_incompatibility_is_reported() {
        let err = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-a", "1.0.0"),
                ("plugin-processing-b", "1.5.0"),
            ]),
            BTreeMap::from([(
                "plugin-processing-a".to_string(),
                vec![edge("plugin-processing-b", "^2.0.0")],
            )]),
        )
        .unwrap_err();
        match err {
            GraphError::VersionIncompatibility {
                dependent,
                dependency,
                required,
                actual,
            } => {
                assert_eq!(dependent, "plugin-processing-a");
                assert_eq!(dependency, "plugin-processing-b");
                assert_eq!(required, "^2.0.0");
                assert_eq!(actual, "1.5.0");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn cycle_is_reported_with_a_closed_path() {
        let err = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-a", "1.0.0"),
                ("plugin-processing-b", "1.0.0"),
                ("plugin-processing-c", "1.0.0"),
            ]),
            BTreeMap::from([
                (
                    "plugin-processing-a".to_string(),
                    vec![edge("plugin-processing-b", "*")],
                ),
                (
                    "plugin-processing-b".to_string(),
                    vec![edge("plugin-processing-c", "*")],
                ),
                (
                    "plugin-processing-c".to_string(),
                    vec![edge("plugin-processing-a", "*")],
                ),
            ]),
        )
        .unwrap_err();
        let GraphError::CyclicDependency { path } = err else {
            panic!("expected cycle");
        };
        assert_eq!(path.first(), path.last());
        // a -> b -> c -> a has four entries with the start repeated.
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn two_node_cycle_is_shortest() {
        let err = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-a", "1.0.0"),
                ("plugin-processing-b", "1.0.0"),
                ("plugin-processing-c", "1.0.0"),
            ]),
            BTreeMap::from([
                (
                    "plugin-processing-a".to_string(),
                    vec![edge("plugin-processing-b", "*")],
                ),
                (
                    "plugin-processing-b".to_string(),
                    vec![
                        edge("plugin-processing-a", "*"),
                        edge("plugin-processing-c", "*"),
                    ],
                ),
                (
                    "plugin-processing-c".to_string(),
                    vec![edge("plugin-processing-b", "*")],
                ),
            ]),
        )
        .unwrap_err();
        let GraphError::CyclicDependency { path } = err else {
            panic!("expected cycle");
        };
        assert_eq!(path.len(), 3, "expected a two-node cycle, got {path:?}");
    }

    #[test]
    fn reachability_queries() {
        let graph = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-a", "1.0.0"),
                ("plugin-processing-b", "1.0.0"),
                ("plugin-processing-c", "1.0.0"),
            ]),
            BTreeMap::from([
                (
                    "plugin-processing-a".to_string(),
                    vec![edge("plugin-processing-b", "*")],
                ),
                (
                    "plugin-processing-b".to_string(),
                    vec![edge("plugin-processing-c", "*")],
                ),
            ]),
        )
        .unwrap();

        assert_eq!(
            graph.reachable_from("plugin-processing-a"),
            BTreeSet::from([
                "plugin-processing-b".to_string(),
                "plugin-processing-c".to_string()
            ])
        );
        assert_eq!(
            graph.dependents_of("plugin-processing-c"),
            BTreeSet::from([
                "plugin-processing-a".to_string(),
                "plugin-processing-b".to_string()
            ])
        );
        assert!(graph.dependents_of("plugin-processing-a").is_empty());
    }

    #[test]
    fn prerelease_dependency_requires_prerelease_constraint() {
        let err = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-a", "1.0.0"),
                ("plugin-processing-b", "2.0.0-beta.1"),
            ]),
            BTreeMap::from([(
                "plugin-processing-a".to_string(),
                vec![edge("plugin-processing-b", ">=2.0.0")],
            )]),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::VersionIncompatibility { .. }));

        let graph = DependencyGraph::build(
            nodes(&[
                ("plugin-processing-a", "1.0.0"),
                ("plugin-processing-b", "2.0.0-beta.1"),
            ]),
            BTreeMap::from([(
                "plugin-processing-a".to_string(),
                vec![edge("plugin-processing-b", ">=2.0.0-alpha")],
            )]),
        );
        assert!(graph.is_ok());
    }
}
