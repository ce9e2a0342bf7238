// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Step dependency graph
//!
//! Built once from a list of [`StepSpec`]s and validated up front: ids are
//! unique, every upstream id resolves and the relation is acyclic. After
//! construction the graph is read-only.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::errors::EtlflowError;
use crate::pipeline::{StepId, StepSpec};

/// Validated DAG of steps
#[derive(Debug)]
pub struct Graph {
    steps: Vec<StepSpec>,
    graph: DiGraph<usize, ()>,
    id_to_index: HashMap<StepId, NodeIndex>,
    layers: Vec<Vec<usize>>,
}

impl Graph {
    /// Build and validate a graph
    ///
    /// Edges come from each step's `upstream` list. Declaration order is kept
    /// and used to break ties inside a layer.
    pub fn build(steps: Vec<StepSpec>) -> Result<Self, EtlflowError> {
        let mut graph = DiGraph::new();
        let mut id_to_index = HashMap::new();

        for (idx, spec) in steps.iter().enumerate() {
            if id_to_index.contains_key(&spec.id) {
                return Err(EtlflowError::DuplicateStep {
                    step: spec.id.clone(),
                });
            }
            let node = graph.add_node(idx);
            id_to_index.insert(spec.id.clone(), node);
        }

        for spec in &steps {
            let node = id_to_index[&spec.id];
            for dep in &spec.upstream {
                let dep_node = id_to_index.get(dep).ok_or_else(|| {
                    EtlflowError::UnknownDependency {
                        step: spec.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;

                if !graph.contains_edge(*dep_node, node) {
                    graph.add_edge(*dep_node, node, ());
                }
            }
        }

        let mut dag = Self {
            steps,
            graph,
            id_to_index,
            layers: Vec::new(),
        };

        dag.validate_acyclic()?;
        dag.layers = dag.compute_layers();

        Ok(dag)
    }

    fn validate_acyclic(&self) -> Result<(), EtlflowError> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(_) => Err(EtlflowError::CircularDependency {
                steps: self.find_cycle_members(),
            }),
        }
    }

    /// Steps of the first strongly connected component that forms a cycle,
    /// in declaration order
    fn find_cycle_members(&self) -> Vec<String> {
        let cycle = tarjan_scc(&self.graph).into_iter().find(|scc| {
            scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
        });

        let mut members: Vec<usize> = cycle
            .unwrap_or_default()
            .into_iter()
            .map(|n| self.graph[n])
            .collect();
        members.sort_unstable();

        members
            .into_iter()
            .map(|idx| self.steps[idx].id.clone())
            .collect()
    }

    /// Longest-path depth of each step, grouped by depth
    fn compute_layers(&self) -> Vec<Vec<usize>> {
        let mut depth: Vec<Option<usize>> = vec![None; self.steps.len()];

        // Acyclic, so a topological walk sees every upstream before its dependents.
        let order = toposort(&self.graph, None).unwrap_or_default();
        for node in order {
            let idx = self.graph[node];
            let d = self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .filter_map(|up| depth[self.graph[up]])
                .map(|up_depth| up_depth + 1)
                .max()
                .unwrap_or(0);
            depth[idx] = Some(d);
        }

        let mut layers: Vec<Vec<usize>> = Vec::new();
        for (idx, d) in depth.into_iter().enumerate() {
            let d = d.unwrap_or(0);
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(idx);
        }

        layers
    }

    /// Sets of step ids that can run concurrently, in execution order
    ///
    /// Every step's upstream ids belong to strictly earlier sets. Within a
    /// set, ids appear in declaration order, so the partition is the same
    /// for every call on the same graph.
    pub fn topological_layers(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        self.layers
            .iter()
            .map(move |layer| layer.iter().map(|&idx| self.steps[idx].id.as_str()).collect())
    }

    /// Number of layers
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Look up a step by id
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        let node = self.id_to_index.get(id)?;
        Some(&self.steps[self.graph[*node]])
    }

    /// All steps in declaration order
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps without upstream dependencies
    pub fn roots(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.upstream.is_empty())
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Get dependencies for a step (steps that must run before it)
    pub fn dependencies(&self, id: &str) -> Option<Vec<String>> {
        self.step(id).map(|s| s.upstream.clone())
    }

    /// Get dependents for a step (steps that depend on it), in declaration order
    pub fn dependents(&self, id: &str) -> Option<Vec<String>> {
        self.step(id)?;
        Some(
            self.steps
                .iter()
                .filter(|s| s.upstream.iter().any(|u| u == id))
                .map(|s| s.id.clone())
                .collect(),
        )
    }

    /// Check if step A depends (directly or transitively) on step B
    pub fn depends_on(&self, step_a: &str, step_b: &str) -> bool {
        let Some(node_a) = self.id_to_index.get(step_a) else {
            return false;
        };
        let Some(node_b) = self.id_to_index.get(step_b) else {
            return false;
        };

        node_a != node_b && petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for spec in &self.steps {
            match &spec.sensor {
                Some(sensor) => out.push_str(&format!(
                    "    {}{{{{{}}}}} -.-> {}[{}]\n",
                    sensor_node(&spec.id),
                    sensor.target_id(),
                    spec.id,
                    spec.id
                )),
                None => out.push_str(&format!("    {}[{}]\n", spec.id, spec.id)),
            }
        }

        for spec in &self.steps {
            for dep in &spec.upstream {
                out.push_str(&format!("    {} --> {}\n", dep, spec.id));
            }
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=LR;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for spec in &self.steps {
            if let Some(sensor) = &spec.sensor {
                out.push_str(&format!(
                    "    \"{}\" [shape=diamond, label=\"{}\"];\n",
                    sensor_node(&spec.id),
                    sensor.target_id()
                ));
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [style=dashed];\n",
                    sensor_node(&spec.id),
                    spec.id
                ));
            }
        }

        for spec in &self.steps {
            for dep in &spec.upstream {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", dep, spec.id));
            }
        }

        // Isolated steps (no edges, no sensor)
        for spec in &self.steps {
            let node = self.id_to_index[&spec.id];
            if spec.sensor.is_none() && self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", spec.id));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the layered execution order
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, layer) in self.topological_layers().enumerate() {
            out.push_str(&format!("layer {}:\n", i + 1));
            for id in layer {
                out.push_str(&format!("  - {}", id));
                if let Some(spec) = self.step(id) {
                    if let Some(sensor) = &spec.sensor {
                        out.push_str(&format!(" (waits for {})", sensor.target_id()));
                    }
                    if !spec.upstream.is_empty() {
                        out.push_str(&format!(" [depends: {}]", spec.upstream.join(", ")));
                    }
                }
                out.push('\n');
            }
        }

        out
    }
}

fn sensor_node(step_id: &str) -> String {
    format!("{}_sensor", step_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Payload, RunContext, Step, StepError, StepInputs};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Step for Noop {
        async fn execute(&self, _: &RunContext, _: &StepInputs) -> Result<Payload, StepError> {
            Ok(Payload::Empty)
        }
    }

    fn make_graph(steps: Vec<(&str, Vec<&str>)>) -> Result<Graph, EtlflowError> {
        Graph::build(
            steps
                .into_iter()
                .map(|(id, deps)| StepSpec::new(id, Arc::new(Noop)).after(deps))
                .collect(),
        )
    }

    fn layers(graph: &Graph) -> Vec<Vec<String>> {
        graph
            .topological_layers()
            .map(|l| l.into_iter().map(String::from).collect())
            .collect()
    }

    #[test]
    fn test_linear_dag() {
        let dag = make_graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]).unwrap();

        assert_eq!(layers(&dag), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond_dag() {
        let dag = make_graph(vec![
            ("a", vec![]),
            ("c", vec!["a"]),
            ("b", vec!["a"]),
            ("d", vec!["b", "c"]),
        ])
        .unwrap();

        // ties keep declaration order
        assert_eq!(layers(&dag), vec![vec!["a"], vec!["c", "b"], vec!["d"]]);
    }

    #[test]
    fn test_uneven_branches_join_after_longest() {
        let dag = make_graph(vec![
            ("a1", vec![]),
            ("b1", vec![]),
            ("a2", vec!["a1"]),
            ("a3", vec!["a2"]),
            ("join", vec!["a3", "b1"]),
        ])
        .unwrap();

        assert_eq!(
            layers(&dag),
            vec![vec!["a1", "b1"], vec!["a2"], vec!["a3"], vec!["join"]]
        );
        assert_eq!(dag.roots(), vec!["a1", "b1"]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let result = make_graph(vec![("x", vec![]), ("a", vec!["b"]), ("b", vec!["a"])]);

        match result {
            Err(EtlflowError::CircularDependency { steps }) => assert_eq!(steps, vec!["a", "b"]),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let result = make_graph(vec![("a", vec!["a"])]);
        assert!(matches!(result, Err(EtlflowError::CircularDependency { .. })));
    }

    #[test]
    fn test_unknown_dependency() {
        let result = make_graph(vec![("a", vec!["nonexistent"])]);
        assert!(matches!(result, Err(EtlflowError::UnknownDependency { .. })));
    }

    #[test]
    fn test_duplicate_step() {
        let result = make_graph(vec![("a", vec![]), ("a", vec![])]);
        assert!(matches!(result, Err(EtlflowError::DuplicateStep { .. })));
    }

    #[test]
    fn test_depends_on_check() {
        let dag = make_graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]).unwrap();

        assert!(dag.depends_on("c", "a")); // transitive
        assert!(dag.depends_on("c", "b")); // direct
        assert!(!dag.depends_on("a", "c")); // reverse
        assert!(!dag.depends_on("a", "a"));
        assert_eq!(dag.dependents("a"), Some(vec!["b".to_string()]));
        assert_eq!(dag.dependencies("c"), Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_mermaid_output() {
        let dag = make_graph(vec![("a", vec![]), ("b", vec!["a"])]).unwrap();
        let mermaid = dag.to_mermaid();

        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("a --> b"));
    }

    #[test]
    fn test_text_output() {
        let dag = make_graph(vec![("a", vec![]), ("b", vec!["a"])]).unwrap();
        assert_eq!(dag.to_text(), "layer 1:\n  - a\nlayer 2:\n  - b [depends: a]\n");
    }

    /// Random DAG: step i may only depend on steps with a smaller index
    fn arb_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1usize..12).prop_flat_map(|n| {
            (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>()
                .prop_map(|deps| {
                    deps.into_iter()
                        .enumerate()
                        .map(|(i, d)| d.into_iter().filter(|&u| u < i).collect())
                        .collect()
                })
        })
    }

    fn build_indexed(deps: &[Vec<usize>]) -> Result<Graph, EtlflowError> {
        Graph::build(
            deps.iter()
                .enumerate()
                .map(|(i, d)| {
                    StepSpec::new(format!("s{i}"), Arc::new(Noop))
                        .after(d.iter().map(|u| format!("s{u}")))
                })
                .collect(),
        )
    }

    proptest! {
        #[test]
        fn prop_acyclic_builds_and_layers_respect_order(deps in arb_dag()) {
            let dag = build_indexed(&deps).unwrap();

            let mut layer_of = HashMap::new();
            for (i, layer) in dag.topological_layers().enumerate() {
                for id in layer {
                    layer_of.insert(id.to_string(), i);
                }
            }
            prop_assert_eq!(layer_of.len(), deps.len());

            for (i, d) in deps.iter().enumerate() {
                let me = format!("s{}", i);
                for u in d {
                    let up = format!("s{}", u);
                    prop_assert!(layer_of[&up] < layer_of[&me], "{} must precede {}", up, me);
                }
            }

            let again: Vec<Vec<String>> = layers(&dag);
            prop_assert_eq!(layers(&build_indexed(&deps).unwrap()), again);
        }

        #[test]
        fn prop_back_edge_is_rejected(deps in arb_dag()) {
            let n = deps.len();
            let mut deps = deps;
            // chain every step to its predecessor, then close the loop
            for i in 1..n {
                if !deps[i].contains(&(i - 1)) {
                    deps[i].push(i - 1);
                }
            }
            deps[0].push(n - 1);

            let is_cycle = matches!(
                build_indexed(&deps),
                Err(EtlflowError::CircularDependency { .. })
            );
            prop_assert!(is_cycle);
        }
    }
}
