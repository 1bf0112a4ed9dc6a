//! Dependency DAG and topological ordering
//!
//! Built fresh for every load pass over the records whose dependency check
//! passed. Uses petgraph for graph storage and the sort itself.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

/// Directed graph over the eligible records of one load pass. Edges run
/// dependency -> dependent, so the sort yields dependencies first.
#[derive(Default)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an eligible record. Insertion order fixes the tie-break between
    /// independent siblings, so callers feed nodes in registry order.
    pub fn add_plugin(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            let index = self.graph.add_node(name.to_string());
            self.nodes.insert(name.to_string(), index);
        }
    }

    /// Edge from `dependency` to `dependent`. Ends that are not nodes are
    /// skipped: a missing end was not eligible, and that record already
    /// carries its own failure.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        if let (Some(&to), Some(&from)) = (self.nodes.get(dependent), self.nodes.get(dependency)) {
            self.graph.add_edge(from, to, ());
        }
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Dependencies-first order, or `None` when the graph contains a cycle.
    pub fn load_order(&self) -> Option<Vec<String>> {
        toposort(&self.graph, None).ok().map(|order| {
            order
                .into_iter()
                .map(|index| self.graph[index].clone())
                .collect()
        })
    }
}
