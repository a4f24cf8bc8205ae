use crate::catalog::descriptor::FunctionId;
use crate::core::specification::ValueSpecification;
use crate::core::target::ComputationTargetSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What produces a node's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSource {
    /// A registered compute function.
    Function(FunctionId),
    /// The market-data provider (leaf observation).
    MarketData,
}

/// One resolved function invocation in a dependency graph.
///
/// Nodes reference each other only through value specifications, never by
/// direct pointer: the graph structure derives edges by matching a node's
/// input specifications to other nodes' outputs, which keeps nodes
/// serializable and the structure acyclic-by-construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    source: NodeSource,
    target: ComputationTargetSpec,
    inputs: Vec<ValueSpecification>,
    outputs: Vec<ValueSpecification>,
}

impl DependencyNode {
    /// A node invoking `function` on `target`.
    ///
    /// # Panics
    ///
    /// Panics if `outputs` is empty — a node that produces nothing can
    /// never be demanded.
    pub fn function_node(
        function: FunctionId,
        target: ComputationTargetSpec,
        inputs: Vec<ValueSpecification>,
        outputs: Vec<ValueSpecification>,
    ) -> Self {
        assert!(!outputs.is_empty(), "node must produce at least one output");
        Self {
            source: NodeSource::Function(function),
            target,
            inputs,
            outputs,
        }
    }

    /// A leaf node sourcing `spec` from market data.
    pub fn market_data_node(spec: ValueSpecification) -> Self {
        Self {
            source: NodeSource::MarketData,
            target: spec.target().clone(),
            inputs: Vec::new(),
            outputs: vec![spec],
        }
    }

    pub fn source(&self) -> &NodeSource {
        &self.source
    }

    pub fn function(&self) -> Option<&FunctionId> {
        match &self.source {
            NodeSource::Function(id) => Some(id),
            NodeSource::MarketData => None,
        }
    }

    pub fn is_market_data(&self) -> bool {
        matches!(self.source, NodeSource::MarketData)
    }

    pub fn target(&self) -> &ComputationTargetSpec {
        &self.target
    }

    pub fn inputs(&self) -> &[ValueSpecification] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueSpecification] {
        &self.outputs
    }

    /// The node's primary output, used when one specification has to
    /// stand for the node in diagnostics.
    pub fn primary_output(&self) -> &ValueSpecification {
        &self.outputs[0]
    }

    pub fn produces(&self, spec: &ValueSpecification) -> bool {
        self.outputs.iter().any(|s| s == spec)
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            NodeSource::Function(id) => {
                write!(f, "{}({}) -> {}", id, self.target, self.primary_output())
            }
            NodeSource::MarketData => write!(f, "market-data -> {}", self.primary_output()),
        }
    }
}
