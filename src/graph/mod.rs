//! Dependency-graph structure: resolved nodes and the immutable DAG the
//! scheduler walks.

pub mod dep_graph;
pub mod node;
