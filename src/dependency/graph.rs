//! Prerequisite graph built from a ledger snapshot.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::ledger::LedgerSnapshot;

/// Directed graph with an edge from each work item to each of its
/// prerequisites. Aggregate (epic/retrospective) records are excluded.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from a snapshot. Prerequisites are resolved to their
    /// full ledger key where possible; unknown prerequisites become leaf nodes.
    pub fn from_snapshot(snapshot: &LedgerSnapshot) -> Self {
        let mut graph = Self::default();

        for entry in snapshot.entries().iter().filter(|e| !e.is_aggregate()) {
            graph.node(&entry.key);
        }

        for entry in snapshot.entries().iter().filter(|e| !e.is_aggregate()) {
            let from = graph.node(&entry.key);
            for prerequisite in &entry.prerequisites {
                let resolved = snapshot.resolve(prerequisite);
                if resolved.is_some_and(|target| target.is_aggregate()) {
                    continue;
                }
                let key = resolved.map_or(prerequisite.as_str(), |target| target.key.as_str());
                let to = graph.node(key);
                graph.graph.update_edge(from, to, ());
            }
        }

        graph
    }

    fn node(&mut self, key: &str) -> NodeIndex {
        if let Some(index) = self.index.get(key) {
            return *index;
        }
        let index = self.graph.add_node(key.to_string());
        self.index.insert(key.to_string(), index);
        index
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Prerequisites of `key` in the order they were declared.
    pub fn prerequisites(&self, key: &str) -> Vec<&str> {
        self.index
            .get(key)
            .map(|index| {
                self.ordered_neighbors(*index)
                    .into_iter()
                    .map(|n| self.graph[n].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    // petgraph yields the most recently added edge first.
    fn ordered_neighbors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        neighbors.reverse();
        neighbors
    }

    /// Every prerequisite cycle reachable by depth-first traversal.
    ///
    /// Each cycle starts and ends with the same key. Finding a cycle does not
    /// stop the traversal, so unrelated parts of the graph are still visited.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        if !is_cyclic_directed(&self.graph) {
            return Vec::new();
        }

        let mut walk = CycleWalk::default();
        for node in self.graph.node_indices() {
            if !walk.visited.contains(&node) {
                self.visit(node, &mut walk);
            }
        }
        walk.cycles
    }

    fn visit(&self, node: NodeIndex, walk: &mut CycleWalk) {
        walk.visited.insert(node);
        walk.stack.push(node);
        walk.on_stack.insert(node);

        for next in self.ordered_neighbors(node) {
            if walk.on_stack.contains(&next) {
                if let Some(start) = walk.stack.iter().position(|n| *n == next) {
                    let mut cycle: Vec<String> = walk.stack[start..]
                        .iter()
                        .map(|n| self.graph[*n].clone())
                        .collect();
                    cycle.push(self.graph[next].clone());
                    walk.cycles.push(cycle);
                }
            } else if !walk.visited.contains(&next) {
                self.visit(next, walk);
            }
        }

        walk.stack.pop();
        walk.on_stack.remove(&node);
    }
}

#[derive(Default)]
struct CycleWalk {
    visited: HashSet<NodeIndex>,
    on_stack: HashSet<NodeIndex>,
    stack: Vec<NodeIndex>,
    cycles: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(ledger: &str) -> DependencyGraph {
        DependencyGraph::from_snapshot(&LedgerSnapshot::parse(ledger))
    }

    #[test]
    fn test_excludes_aggregate_records() {
        let g = graph("epic-1: in-progress\n1-1-a: done\n1-2-b: backlog  # depends-on: 1-1, epic-1\nepic-1-retrospective: optional\n");
        assert_eq!(g.len(), 2);
        assert!(!g.contains("epic-1"));
        assert_eq!(g.prerequisites("1-2-b"), vec!["1-1-a"]);
    }

    #[test]
    fn test_prerequisites_keep_declared_order() {
        let g = graph("a: done\nb: done\nc: done\nd: backlog  # depends-on: c, a, b\n");
        assert_eq!(g.prerequisites("d"), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_unknown_prerequisite_is_leaf() {
        let g = graph("a: backlog  # depends-on: ghost\n");
        assert!(g.contains("ghost"));
        assert!(g.prerequisites("ghost").is_empty());
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph("a: done\nb: backlog  # depends-on: a\nc: backlog  # depends-on: a, b\n");
        assert!(g.find_cycles().is_empty());
    }

    #[test]
    fn test_three_node_cycle() {
        let g = graph("A: backlog  # depends-on: B\nB: backlog  # depends-on: C\nC: backlog  # depends-on: A\n");
        assert_eq!(g.find_cycles(), vec![vec!["A", "B", "C", "A"]]);
    }

    #[test]
    fn test_self_cycle_has_length_two() {
        let g = graph("A: backlog  # depends-on: A\n");
        assert_eq!(g.find_cycles(), vec![vec!["A", "A"]]);
    }

    #[test]
    fn test_cycle_does_not_stop_traversal() {
        let g = graph(
            "A: backlog  # depends-on: B\nB: backlog  # depends-on: A\nX: backlog  # depends-on: Y\nY: backlog  # depends-on: X\n",
        );
        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 2);
        for cycle in &cycles {
            assert!(cycle.len() >= 2);
            assert_eq!(cycle.first(), cycle.last());
        }
    }
}
