use crate::core::requirement::ValueRequirement;
use crate::core::specification::ValueSpecification;
use crate::graph::node::DependencyNode;
use log::debug;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Structural errors in graph construction. The resolver's cycle guard
/// makes `CycleDetected` unreachable for resolver-built graphs; it exists
/// to catch hand-built node sets that violate the contract.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cycle detected in dependency graph")]
    CycleDetected,
}

/// A requirement the resolver could not satisfy, with a human-readable
/// reason. Recorded per requirement; never aborts the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsatisfiedRequirement {
    pub requirement: ValueRequirement,
    pub reason: String,
}

impl fmt::Display for UnsatisfiedRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.requirement, self.reason)
    }
}

/// Accumulates resolved nodes and terminal mappings during a resolution
/// pass, then wires them into an immutable [`DependencyGraph`].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Arc<DependencyNode>>,
    by_output: HashMap<ValueSpecification, usize>,
    terminals: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
    unsatisfied: Vec<UnsatisfiedRequirement>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node unless one already produces its primary output; returns
    /// the node actually stored (the shared one on reuse). Sharing by
    /// specification is what makes diamond dependencies a single node.
    pub fn add_node(&mut self, node: Arc<DependencyNode>) -> Arc<DependencyNode> {
        if let Some(&existing) = self.by_output.get(node.primary_output()) {
            return Arc::clone(&self.nodes[existing]);
        }
        let index = self.nodes.len();
        for output in node.outputs() {
            self.by_output.entry(output.clone()).or_insert(index);
        }
        self.nodes.push(Arc::clone(&node));
        node
    }

    pub fn node_producing(&self, spec: &ValueSpecification) -> Option<&Arc<DependencyNode>> {
        self.by_output.get(spec).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, spec: &ValueSpecification) -> bool {
        self.by_output.contains_key(spec)
    }

    /// Mark `spec` as a terminal output demanded by `requirement`.
    pub fn add_terminal(&mut self, spec: ValueSpecification, requirement: ValueRequirement) {
        self.terminals.entry(spec).or_default().insert(requirement);
    }

    pub fn add_unsatisfied(&mut self, requirement: ValueRequirement, reason: impl Into<String>) {
        self.unsatisfied.push(UnsatisfiedRequirement {
            requirement,
            reason: reason.into(),
        });
    }

    /// Fold another builder in (used when per-target resolutions run in
    /// parallel). Nodes already produced here are kept; the merged
    /// builder's duplicates are dropped in favor of the existing ones.
    pub fn merge(&mut self, other: GraphBuilder) {
        for node in other.nodes {
            self.add_node(node);
        }
        for (spec, requirements) in other.terminals {
            self.terminals.entry(spec).or_default().extend(requirements);
        }
        self.unsatisfied.extend(other.unsatisfied);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pending_nodes(&self) -> impl Iterator<Item = &Arc<DependencyNode>> {
        self.nodes.iter()
    }

    /// Wire edges, trim nodes unreachable from any terminal, verify
    /// acyclicity and cache the topological order.
    ///
    /// Trimming matters because the resolution search memoizes *every*
    /// successful sub-resolution, including ones belonging to candidates
    /// that were later backtracked away.
    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        // Reachability sweep from terminal producers, walking input specs.
        let mut reachable: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        for spec in self.terminals.keys() {
            if let Some(&index) = self.by_output.get(spec) {
                if reachable.insert(index) {
                    queue.push_back(index);
                }
            }
        }
        while let Some(index) = queue.pop_front() {
            for input in self.nodes[index].inputs() {
                if let Some(&producer) = self.by_output.get(input) {
                    if reachable.insert(producer) {
                        queue.push_back(producer);
                    }
                }
            }
        }

        let trimmed = self.nodes.len() - reachable.len();
        if trimmed > 0 {
            debug!("trimmed {} unreachable nodes from search graph", trimmed);
        }

        let mut graph: DiGraph<Arc<DependencyNode>, ()> = DiGraph::new();
        let mut by_output: HashMap<ValueSpecification, NodeIndex> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if !reachable.contains(&index) {
                continue;
            }
            let idx = graph.add_node(Arc::clone(node));
            for output in node.outputs() {
                by_output.entry(output.clone()).or_insert(idx);
            }
        }

        // Edge direction: producer -> consumer (execution order).
        let indices: Vec<NodeIndex> = graph.node_indices().collect();
        for &consumer in &indices {
            let inputs: Vec<ValueSpecification> = graph[consumer].inputs().to_vec();
            for input in inputs {
                if let Some(&producer) = by_output.get(&input) {
                    graph.update_edge(producer, consumer, ());
                }
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(GraphError::CycleDetected);
        }
        let topo = toposort(&graph, None).map_err(|_| GraphError::CycleDetected)?;

        Ok(DependencyGraph {
            graph,
            by_output,
            terminals: self.terminals,
            unsatisfied: self.unsatisfied,
            topo,
        })
    }
}

/// The DAG of resolved function invocations for one calculation
/// configuration. Immutable once built; safe to share across execution
/// cycles by `Arc`.
pub struct DependencyGraph {
    graph: DiGraph<Arc<DependencyNode>, ()>,
    by_output: HashMap<ValueSpecification, NodeIndex>,
    terminals: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
    unsatisfied: Vec<UnsatisfiedRequirement>,
    topo: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// An empty graph (no terminals, no nodes).
    pub fn empty() -> Self {
        GraphBuilder::new().build().expect("empty graph is acyclic")
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, index: NodeIndex) -> &Arc<DependencyNode> {
        &self.graph[index]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<DependencyNode>> {
        self.graph.node_weights()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Topological order, computed once at build time.
    pub fn execution_order(&self) -> &[NodeIndex] {
        &self.topo
    }

    /// Terminal specifications and the caller requirements that demanded
    /// them. Everything else in the graph is intermediate.
    pub fn terminal_outputs(&self) -> &BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>> {
        &self.terminals
    }

    pub fn unsatisfied(&self) -> &[UnsatisfiedRequirement] {
        &self.unsatisfied
    }

    pub fn index_producing(&self, spec: &ValueSpecification) -> Option<NodeIndex> {
        self.by_output.get(spec).copied()
    }

    pub fn node_producing(&self, spec: &ValueSpecification) -> Option<&Arc<DependencyNode>> {
        self.index_producing(spec).map(|i| &self.graph[i])
    }

    pub fn contains_spec(&self, spec: &ValueSpecification) -> bool {
        self.by_output.contains_key(spec)
    }

    /// Number of upstream dependencies of a node.
    pub fn fan_in(&self, index: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .count()
    }

    /// Number of downstream dependents of a node.
    pub fn fan_out(&self, index: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .count()
    }

    pub fn dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .collect()
    }

    pub fn dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect()
    }

    /// All transitive downstream nodes of `start` (excluding `start`).
    pub fn downstream_of(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = self.dependents(start).into();
        while let Some(index) = queue.pop_front() {
            if visited.insert(index) {
                queue.extend(self.dependents(index));
            }
        }
        visited
    }

    /// Specifications sourced from the market-data provider.
    pub fn market_data_specs(&self) -> Vec<&ValueSpecification> {
        self.nodes()
            .filter(|n| n.is_market_data())
            .map(|n| n.primary_output())
            .collect()
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== Dependency Graph: {} nodes, {} edges, {} terminals, {} unsatisfied ===",
            self.node_count(),
            self.edge_count(),
            self.terminals.len(),
            self.unsatisfied.len()
        )?;
        for &index in &self.topo {
            writeln!(f, "  {}", self.graph[index])?;
        }
        for unsatisfied in &self.unsatisfied {
            writeln!(f, "  UNSATISFIED {}", unsatisfied)?;
        }
        Ok(())
    }
}
