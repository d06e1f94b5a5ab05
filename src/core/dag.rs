//! Work-package dependency graph.
//!
//! Dependencies are stored as a directed graph with an edge from each
//! dependency to the work package that needs it. The graph is validated once
//! at construction: every dependency must exist in the same feature and the
//! graph must be acyclic.

use crate::core::feature::Feature;
use crate::core::work_package::{Lane, WorkPackage, WorkPackageId};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Finished,
}

/// Validated dependency graph for one feature.
pub struct DependencyGraph {
    graph: DiGraph<WorkPackageId, ()>,
    index: HashMap<WorkPackageId, NodeIndex>,
}

impl DependencyGraph {
    /// Build and validate the graph for a set of work packages.
    ///
    /// # Errors
    /// - `InvalidRequest` if two work packages share an id
    /// - `UnknownDependency` if a dependency is not in the set
    /// - `CycleDetected` naming the cycle, if one exists
    pub fn build(work_packages: &[WorkPackage]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        let mut sorted: Vec<&WorkPackage> = work_packages.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        for wp in &sorted {
            if index.contains_key(&wp.id) {
                return Err(Error::InvalidRequest(format!(
                    "duplicate work package id {}",
                    wp.id
                )));
            }
            let node = graph.add_node(wp.id.clone());
            index.insert(wp.id.clone(), node);
        }

        for wp in &sorted {
            let to = index[&wp.id];
            for dep in &wp.dependencies {
                let from = *index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    wp: wp.id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(from, to, ());
            }
        }

        let dag = Self { graph, index };
        if let Some(cycle) = dag.find_cycle() {
            return Err(Error::CycleDetected {
                cycle: cycle.into_iter().map(|id| id.to_string()).collect(),
            });
        }
        Ok(dag)
    }

    pub fn build_for(feature: &Feature) -> Result<Self> {
        Self::build(&feature.work_packages)
    }

    /// Depth-first search with a recursion stack. Returns the first cycle
    /// found, with its starting node repeated at the end.
    fn find_cycle(&self) -> Option<Vec<WorkPackageId>> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack = Vec::new();

        // Node indices follow id order, so the search is deterministic.
        for start in self.graph.node_indices() {
            if marks[start.index()] == Mark::Unvisited {
                if let Some(cycle) = self.visit(start, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<WorkPackageId>> {
        marks[node.index()] = Mark::OnStack;
        stack.push(node);

        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        next.sort();

        for succ in next {
            match marks[succ.index()] {
                Mark::OnStack => {
                    let pos = stack.iter().position(|n| *n == succ).unwrap_or(0);
                    let mut cycle: Vec<WorkPackageId> = stack[pos..]
                        .iter()
                        .map(|n| self.graph[*n].clone())
                        .collect();
                    cycle.push(self.graph[succ].clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(succ, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Finished => {}
            }
        }

        stack.pop();
        marks[node.index()] = Mark::Finished;
        None
    }

    /// Deterministic topological order; among nodes whose dependencies are
    /// all placed, the smallest id goes first.
    pub fn topological_order(&self) -> Vec<WorkPackageId> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut heap: BinaryHeap<Reverse<(WorkPackageId, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| Reverse((self.graph[*n].clone(), *n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((id, node))) = heap.pop() {
            order.push(id);
            for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        heap.push(Reverse((self.graph[succ].clone(), succ)));
                    }
                }
            }
        }
        order
    }

    /// Direct dependencies of a work package, sorted by id.
    pub fn dependencies_of(&self, id: &WorkPackageId) -> Vec<WorkPackageId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Work packages that directly depend on `id`, sorted by id.
    pub fn dependents_of(&self, id: &WorkPackageId) -> Vec<WorkPackageId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &WorkPackageId, dir: Direction) -> Vec<WorkPackageId> {
        let mut out: Vec<WorkPackageId> = match self.index.get(id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, dir)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        };
        out.sort();
        out.dedup();
        out
    }

    /// Whether any work package declares a dependency.
    pub fn has_dependencies(&self) -> bool {
        self.graph.edge_count() > 0
    }

    /// Dependencies of `id` that are not yet `done`.
    pub fn unsatisfied(&self, feature: &Feature, id: &WorkPackageId) -> Vec<WorkPackageId> {
        self.dependencies_of(id)
            .into_iter()
            .filter(|dep| feature.lane_of(dep) != Some(Lane::Done))
            .collect()
    }

    /// Work packages in `planned` whose dependencies are all `done`.
    pub fn ready(&self, feature: &Feature) -> Vec<WorkPackageId> {
        let mut ready: Vec<WorkPackageId> = feature
            .work_packages
            .iter()
            .filter(|wp| wp.lane() == Lane::Planned)
            .filter(|wp| self.unsatisfied(feature, &wp.id).is_empty())
            .map(|wp| wp.id.clone())
            .collect();
        ready.sort();
        ready
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("work_packages", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}
