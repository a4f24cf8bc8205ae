//! Turning value requirements into an executable dependency graph.
//!
//! The resolver searches the compiled catalog backwards from each
//! requirement: pick a candidate function, resolve its inputs as new
//! requirements, backtrack when a candidate cannot be completed. The
//! search lives in [`solver`]; candidate enumeration and ordering in
//! [`candidates`].

pub(crate) mod candidates;
pub(crate) mod solver;

use crate::catalog::compiled::CompiledCatalog;
use crate::core::requirement::ValueRequirement;
use crate::core::target::ComputationTargetSpec;
use crate::cost::CostModel;
use crate::exec::market::MarketDataAvailability;
use crate::exec::scheduler::CancelToken;
use crate::graph::dep_graph::{DependencyGraph, GraphBuilder, GraphError};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use solver::{resolve_requirement, SearchState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tunables for the resolution search.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum frame depth before a candidate is abandoned. Guards
    /// against pathological catalogs; well-formed chains stay far
    /// below it.
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

/// Cumulative counters across every pass this resolver has run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResolverMetrics {
    pub candidates_evaluated: u64,
    pub requirements_resolved: u64,
    pub requirements_unsatisfied: u64,
    pub memo_hits: u64,
}

/// Builds dependency graphs from requirements against one compiled
/// catalog snapshot.
///
/// The resolver is immutable after construction and safe to share
/// across threads. Resolution is deterministic: the same catalog, cost
/// statistics and requirements always produce the same graph.
///
/// # Examples
///
/// ```
/// use depgraph_engine::cost::CostModel;
/// use depgraph_engine::catalog::compiled::FunctionCatalog;
/// use depgraph_engine::exec::market::NoMarketData;
/// use depgraph_engine::resolver::GraphResolver;
/// use std::sync::Arc;
///
/// let catalog = FunctionCatalog::new().compile();
/// let resolver = GraphResolver::new(catalog, Arc::new(CostModel::default()), Arc::new(NoMarketData));
/// let graph = resolver.resolve(&[]).unwrap();
/// assert_eq!(graph.node_count(), 0);
/// ```
pub struct GraphResolver {
    catalog: Arc<CompiledCatalog>,
    cost: Arc<CostModel>,
    market: Arc<dyn MarketDataAvailability>,
    config: ResolverConfig,
    candidates_evaluated: AtomicU64,
    requirements_resolved: AtomicU64,
    requirements_unsatisfied: AtomicU64,
    memo_hits: AtomicU64,
}

impl GraphResolver {
    pub fn new(
        catalog: Arc<CompiledCatalog>,
        cost: Arc<CostModel>,
        market: Arc<dyn MarketDataAvailability>,
    ) -> Self {
        Self {
            catalog,
            cost,
            market,
            config: ResolverConfig::default(),
            candidates_evaluated: AtomicU64::new(0),
            requirements_resolved: AtomicU64::new(0),
            requirements_unsatisfied: AtomicU64::new(0),
            memo_hits: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(&self) -> &Arc<CompiledCatalog> {
        &self.catalog
    }

    pub fn catalog_version(&self) -> u64 {
        self.catalog.version()
    }

    /// Resolve a batch of requirements into one dependency graph.
    ///
    /// Requirements that cannot be resolved do not fail the batch; they
    /// are recorded on the graph as unsatisfied, with the reason.
    pub fn resolve(&self, requirements: &[ValueRequirement]) -> Result<DependencyGraph, GraphError> {
        let builder = self.resolve_into(GraphBuilder::new(), requirements, None);
        builder.build()
    }

    /// Like [`resolve`](Self::resolve), abandoning the search when the
    /// token is raised. Requirements not yet resolved at that point are
    /// recorded as unsatisfied; nodes already committed stay reachable
    /// through the graph the call still returns.
    pub fn resolve_with_cancel(
        &self,
        requirements: &[ValueRequirement],
        cancel: &CancelToken,
    ) -> Result<DependencyGraph, GraphError> {
        let builder = self.resolve_into(GraphBuilder::new(), requirements, Some(cancel));
        builder.build()
    }

    /// Like [`resolve`](Self::resolve), but seeded with the nodes of a
    /// previous graph so unchanged subtrees are reused by reference.
    /// Seeded nodes the new requirements never reach are trimmed at
    /// build time.
    pub fn resolve_seeded(
        &self,
        requirements: &[ValueRequirement],
        previous: &DependencyGraph,
    ) -> Result<DependencyGraph, GraphError> {
        let mut builder = GraphBuilder::new();
        for node in previous.nodes() {
            builder.add_node(Arc::clone(node));
        }
        let builder = self.resolve_into(builder, requirements, None);
        builder.build()
    }

    /// Resolve with requirements partitioned by target and the
    /// partitions searched in parallel. Partial graphs are merged in
    /// target order, so the result is identical to a sequential
    /// [`resolve`](Self::resolve) over the same batch.
    pub fn resolve_parallel(
        &self,
        requirements: &[ValueRequirement],
    ) -> Result<DependencyGraph, GraphError> {
        let mut groups: BTreeMap<ComputationTargetSpec, Vec<ValueRequirement>> = BTreeMap::new();
        for req in requirements {
            groups.entry(req.target().clone()).or_default().push(req.clone());
        }

        let partials: Vec<GraphBuilder> = groups
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(_, group)| self.resolve_into(GraphBuilder::new(), &group, None))
            .collect();

        let mut merged = GraphBuilder::new();
        for partial in partials {
            merged.merge(partial);
        }
        let graph = merged.build()?;
        info!(
            "parallel resolution produced {} nodes, {} unsatisfied",
            graph.node_count(),
            graph.unsatisfied().len()
        );
        Ok(graph)
    }

    /// Cumulative metrics for this resolver instance.
    pub fn metrics(&self) -> ResolverMetrics {
        ResolverMetrics {
            candidates_evaluated: self.candidates_evaluated.load(Ordering::Relaxed),
            requirements_resolved: self.requirements_resolved.load(Ordering::Relaxed),
            requirements_unsatisfied: self.requirements_unsatisfied.load(Ordering::Relaxed),
            memo_hits: self.memo_hits.load(Ordering::Relaxed),
        }
    }

    fn resolve_into(
        &self,
        builder: GraphBuilder,
        requirements: &[ValueRequirement],
        cancel: Option<&CancelToken>,
    ) -> GraphBuilder {
        let mut state = SearchState::new(
            &self.catalog,
            &self.cost,
            self.market.as_ref(),
            &self.config,
            builder,
            cancel,
        );
        for req in requirements {
            match resolve_requirement(&mut state, req) {
                Ok(spec) => state.builder.add_terminal(spec, req.clone()),
                Err(reason) => {
                    warn!("requirement [{}] unsatisfied: {}", req, reason);
                    state.builder.add_unsatisfied(req.clone(), reason);
                }
            }
        }
        self.candidates_evaluated
            .fetch_add(state.metrics.candidates_evaluated, Ordering::Relaxed);
        self.requirements_resolved
            .fetch_add(state.metrics.requirements_resolved, Ordering::Relaxed);
        self.requirements_unsatisfied
            .fetch_add(state.metrics.requirements_unsatisfied, Ordering::Relaxed);
        self.memo_hits.fetch_add(state.metrics.memo_hits, Ordering::Relaxed);
        state.builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::compiled::FunctionCatalog;
    use crate::catalog::descriptor::{
        FunctionDescriptor, FunctionError, FunctionInputs, InputRule,
    };
    use crate::core::properties::ValueProperties;
    use crate::core::target::{ComputationTargetSpec, ComputationTargetType};
    use crate::core::value::ComputedValue;
    use crate::exec::market::{NoMarketData, SnapshotMarketData};
    use std::collections::HashMap;

    fn noop_body() -> impl crate::catalog::descriptor::FunctionBody {
        |_: &ComputationTargetSpec, _: &FunctionInputs| {
            Ok::<_, FunctionError>(HashMap::<String, ComputedValue>::new())
        }
    }

    /// PRESENT_VALUE <- DISCOUNTED_CASHFLOWS <- SPOT_RATE (market data
    /// on the primitive counterpart).
    fn chain_catalog() -> FunctionCatalog {
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("PvFn", ComputationTargetType::Position)
                .produces("PRESENT_VALUE", ValueProperties::none())
                .requires(InputRule::new("DISCOUNTED_CASHFLOWS")),
            noop_body(),
        );
        catalog.register(
            FunctionDescriptor::new("DcfFn", ComputationTargetType::Position)
                .produces("DISCOUNTED_CASHFLOWS", ValueProperties::none())
                .requires(InputRule::new("SPOT_RATE").on_primitive()),
            noop_body(),
        );
        catalog
    }

    fn chain_market(target: &ComputationTargetSpec) -> SnapshotMarketData {
        let mut market = SnapshotMarketData::new();
        market.insert(
            "SPOT_RATE",
            target.primitive_counterpart(),
            ComputedValue::Scalar(0.05),
        );
        market
    }

    fn resolver_over(
        catalog: FunctionCatalog,
        market: impl MarketDataAvailability + 'static,
    ) -> GraphResolver {
        GraphResolver::new(
            catalog.compile(),
            Arc::new(CostModel::default()),
            Arc::new(market),
        )
    }

    #[test]
    fn test_simple_chain_resolves_to_three_nodes() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let resolver = resolver_over(chain_catalog(), chain_market(&target));

        let req = ValueRequirement::simple("PRESENT_VALUE", target);
        let graph = resolver.resolve(std::slice::from_ref(&req)).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert!(graph.unsatisfied().is_empty());
        assert_eq!(graph.terminal_outputs().len(), 1);
        let (terminal, requirements) = graph.terminal_outputs().iter().next().unwrap();
        assert_eq!(terminal.value_name(), "PRESENT_VALUE");
        assert!(requirements.contains(&req));
        assert_eq!(graph.market_data_specs().len(), 1);
    }

    #[test]
    fn test_missing_market_data_reported_not_fatal() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let resolver = resolver_over(chain_catalog(), NoMarketData);

        let req = ValueRequirement::simple("PRESENT_VALUE", target);
        let graph = resolver.resolve(&[req.clone()]).unwrap();

        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.unsatisfied().len(), 1);
        assert_eq!(graph.unsatisfied()[0].requirement, req);
    }

    #[test]
    fn test_backtracks_when_preferred_candidate_has_unsatisfiable_input() {
        // "Fancy" wins ordering on specificity but needs an input
        // nobody can source; "Plain" must win after backtracking.
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("Fancy", ComputationTargetType::Position)
                .produces(
                    "PRESENT_VALUE",
                    ValueProperties::none().with_value("Method", "Exotic"),
                )
                .requires(InputRule::new("UNOBTAINABLE")),
            noop_body(),
        );
        catalog.register(
            FunctionDescriptor::new("Plain", ComputationTargetType::Position)
                .produces("PRESENT_VALUE", ValueProperties::none()),
            noop_body(),
        );
        let resolver = resolver_over(catalog, NoMarketData);

        let target = ComputationTargetSpec::position("DbPos~1");
        let graph = resolver
            .resolve(&[ValueRequirement::simple("PRESENT_VALUE", target)])
            .unwrap();

        assert_eq!(graph.node_count(), 1);
        let node = graph.nodes().next().unwrap();
        assert_eq!(node.function().unwrap().as_str(), "Plain");
    }

    #[test]
    fn test_mutually_recursive_functions_fail_cleanly() {
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("AFn", ComputationTargetType::Position)
                .produces("A", ValueProperties::none())
                .requires(InputRule::new("B")),
            noop_body(),
        );
        catalog.register(
            FunctionDescriptor::new("BFn", ComputationTargetType::Position)
                .produces("B", ValueProperties::none())
                .requires(InputRule::new("A")),
            noop_body(),
        );
        let resolver = resolver_over(catalog, NoMarketData);

        let target = ComputationTargetSpec::position("DbPos~1");
        let graph = resolver
            .resolve(&[ValueRequirement::simple("A", target)])
            .unwrap();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.unsatisfied().len(), 1);
    }

    #[test]
    fn test_self_recursion_guard_allows_layering() {
        // "Composed" asks for the very specification it is producing.
        // The guard rejects that candidate for the inner requirement,
        // which then resolves via "Base", so Composed layers on Base
        // instead of spinning forever.
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("Composed", ComputationTargetType::Position)
                .produces(
                    "YIELD",
                    ValueProperties::none().with_value("Adjusted", "true"),
                )
                .requires(InputRule::new("YIELD").with_constraints(
                    ValueProperties::none().with_value("Adjusted", "true"),
                )),
            noop_body(),
        );
        catalog.register(
            FunctionDescriptor::new("Base", ComputationTargetType::Position)
                .produces("YIELD", ValueProperties::none()),
            noop_body(),
        );
        let resolver = resolver_over(catalog, NoMarketData);

        let target = ComputationTargetSpec::position("DbPos~1");
        let graph = resolver
            .resolve(&[ValueRequirement::simple("YIELD", target)])
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        let terminal = graph.terminal_outputs().keys().next().unwrap();
        assert_eq!(terminal.function().as_str(), "Composed");
        let composed = graph.node_producing(terminal).unwrap();
        assert_eq!(composed.inputs()[0].function().as_str(), "Base");
    }

    #[test]
    fn test_shared_subtree_resolved_once() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let mut catalog = chain_catalog();
        catalog.register(
            FunctionDescriptor::new("YieldFn", ComputationTargetType::Position)
                .produces("YIELD", ValueProperties::none())
                .requires(InputRule::new("DISCOUNTED_CASHFLOWS")),
            noop_body(),
        );
        let resolver = resolver_over(catalog, chain_market(&target));

        let graph = resolver
            .resolve(&[
                ValueRequirement::simple("PRESENT_VALUE", target.clone()),
                ValueRequirement::simple("YIELD", target),
            ])
            .unwrap();

        // PvFn, YieldFn, one shared DcfFn, one market data leaf.
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_parallel_resolution_matches_sequential() {
        let targets: Vec<ComputationTargetSpec> = (0..8)
            .map(|i| ComputationTargetSpec::position(format!("DbPos~{}", i)))
            .collect();
        let mut market = SnapshotMarketData::new();
        for target in &targets {
            market.insert(
                "SPOT_RATE",
                target.primitive_counterpart(),
                ComputedValue::Scalar(0.05),
            );
        }
        let compiled = chain_catalog().compile();
        let cost = Arc::new(CostModel::default());
        let market = Arc::new(market);

        let requirements: Vec<ValueRequirement> = targets
            .iter()
            .map(|t| ValueRequirement::simple("PRESENT_VALUE", t.clone()))
            .collect();

        let sequential = GraphResolver::new(compiled.clone(), cost.clone(), market.clone())
            .resolve(&requirements)
            .unwrap();
        let parallel = GraphResolver::new(compiled, cost, market)
            .resolve_parallel(&requirements)
            .unwrap();

        assert_eq!(sequential.node_count(), parallel.node_count());
        assert_eq!(sequential.edge_count(), parallel.edge_count());
        assert_eq!(
            sequential.terminal_outputs().keys().collect::<Vec<_>>(),
            parallel.terminal_outputs().keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_seeded_resolution_reuses_nodes_by_identity() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let resolver = resolver_over(chain_catalog(), chain_market(&target));

        let req = ValueRequirement::simple("PRESENT_VALUE", target);
        let first = resolver.resolve(std::slice::from_ref(&req)).unwrap();
        let second = resolver.resolve_seeded(std::slice::from_ref(&req), &first).unwrap();

        assert_eq!(first.node_count(), second.node_count());
        for node in second.nodes() {
            let prior = first.node_producing(node.primary_output()).unwrap();
            assert!(Arc::ptr_eq(prior, node));
        }
    }

    #[test]
    fn test_cancelled_resolution_records_requirements_unsatisfied() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let resolver = resolver_over(chain_catalog(), chain_market(&target));

        let cancel = crate::exec::scheduler::CancelToken::new();
        cancel.cancel();
        let graph = resolver
            .resolve_with_cancel(
                &[ValueRequirement::simple("PRESENT_VALUE", target)],
                &cancel,
            )
            .unwrap();

        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.unsatisfied().len(), 1);
        assert!(graph.unsatisfied()[0].reason.contains("cancelled"));
    }

    #[test]
    fn test_metrics_accumulate() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let resolver = resolver_over(chain_catalog(), chain_market(&target));
        assert_eq!(resolver.metrics().candidates_evaluated, 0);

        resolver
            .resolve(&[ValueRequirement::simple("PRESENT_VALUE", target)])
            .unwrap();
        let metrics = resolver.metrics();
        assert!(metrics.candidates_evaluated >= 2);
        assert_eq!(metrics.requirements_unsatisfied, 0);
    }
}
