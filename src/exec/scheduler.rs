//! Parallel execution of a resolved dependency graph.
//!
//! A fixed pool of workers drains a ready queue in dependency order. A
//! node becomes ready when every upstream node has completed; a failure
//! poisons only its downstream cone, so independent subtrees of the
//! same cycle still produce results.

use crate::catalog::compiled::CompiledCatalog;
use crate::catalog::descriptor::{FunctionId, FunctionInputs};
use crate::core::specification::ValueSpecification;
use crate::core::value::ComputedValue;
use crate::cost::CostModel;
use crate::exec::market::MarketDataProvider;
use crate::exec::sink::ResultSink;
use crate::graph::dep_graph::{DependencyGraph, UnsatisfiedRequirement};
use crate::graph::node::DependencyNode;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Lifecycle of one node within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Cooperative cancellation flag, checked between node executions. A
/// node already running is allowed to finish; nothing new starts after
/// the flag is raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker threads draining the ready queue.
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
        }
    }
}

/// Why a node produced no value. Shared by `Arc` between the failing
/// node and everything downstream of it, so the root cause is reported
/// once and referenced everywhere it mattered.
#[derive(Debug)]
pub struct NodeFailure {
    /// Output of the node where the failure originated.
    pub origin: ValueSpecification,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleStats {
    pub nodes_executed: usize,
    pub nodes_failed: usize,
    pub nodes_cancelled: usize,
    pub duration_ms: u64,
}

/// Everything one calculation cycle produced.
#[derive(Debug)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Every value computed during the cycle, terminal or intermediate.
    pub values: HashMap<ValueSpecification, ComputedValue>,
    /// The subset of values the submitted requirements asked for.
    pub terminal_values: BTreeMap<ValueSpecification, ComputedValue>,
    /// Failed nodes by output specification; downstream casualties
    /// share the `Arc` of their root cause.
    pub failures: HashMap<ValueSpecification, Arc<NodeFailure>>,
    /// Terminals that failed, with the root cause for each.
    pub failed_terminals: BTreeMap<ValueSpecification, Arc<NodeFailure>>,
    /// Requirements resolution could not satisfy, carried through from
    /// the graph so consumers see the full picture in one place.
    pub unsatisfied: Vec<UnsatisfiedRequirement>,
    pub cancelled: bool,
    pub stats: CycleStats,
}

impl CycleResult {
    /// True when every terminal produced a value and nothing was
    /// unsatisfied or cancelled.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed_terminals.is_empty() && self.unsatisfied.is_empty()
    }
}

struct DispatchState {
    ready: VecDeque<NodeIndex>,
    /// Unfinished-dependency counters, by node index. Decremented only
    /// on successful completion; failures propagate separately.
    remaining: Vec<usize>,
    status: Vec<NodeState>,
    /// Nodes not yet in a terminal state.
    outstanding: usize,
}

/// Runs resolved graphs against a function catalog and market data.
///
/// The executor owns no mutable state between cycles; one instance can
/// run any number of graphs, concurrently or in sequence.
pub struct CycleExecutor {
    catalog: Arc<CompiledCatalog>,
    cost: Arc<CostModel>,
    provider: Arc<dyn MarketDataProvider>,
    config: ExecutorConfig,
}

impl CycleExecutor {
    pub fn new(
        catalog: Arc<CompiledCatalog>,
        cost: Arc<CostModel>,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            catalog,
            cost,
            provider,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute one cycle over `graph`, delivering the result to `sink`.
    ///
    /// Never returns an error: node failures and missing market data
    /// are recorded per-node in the [`CycleResult`]. The sink is
    /// skipped for cancelled cycles; a partial cycle (some failures,
    /// not cancelled) is still delivered.
    ///
    /// # Panics
    ///
    /// Panics if `config.workers` is zero.
    pub fn execute_cycle(
        &self,
        graph: &DependencyGraph,
        sink: &dyn ResultSink,
        cancel: &CancelToken,
    ) -> CycleResult {
        assert!(self.config.workers > 0, "worker count must be non-zero");
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        debug!(
            "cycle {} starting: {} nodes, {} workers",
            cycle_id,
            graph.node_count(),
            self.config.workers
        );

        let node_slots = graph
            .node_indices()
            .map(|i| i.index())
            .max()
            .map_or(0, |m| m + 1);
        let mut state = DispatchState {
            ready: VecDeque::new(),
            remaining: vec![0; node_slots],
            status: vec![NodeState::Pending; node_slots],
            outstanding: graph.node_count(),
        };
        // Seed in topological order so single-worker runs are fully
        // deterministic.
        for &index in graph.execution_order() {
            state.remaining[index.index()] = graph.fan_in(index);
            if graph.fan_in(index) == 0 {
                state.status[index.index()] = NodeState::Ready;
                state.ready.push_back(index);
            }
        }

        let dispatch = Mutex::new(state);
        let wakeup = Condvar::new();
        let values: DashMap<ValueSpecification, ComputedValue> = DashMap::new();
        let failures: DashMap<ValueSpecification, Arc<NodeFailure>> = DashMap::new();

        std::thread::scope(|scope| {
            for _ in 0..self.config.workers {
                scope.spawn(|| {
                    self.worker_loop(graph, &dispatch, &wakeup, &values, &failures, cancel)
                });
            }
        });

        let final_state = dispatch.into_inner();
        let cancelled = cancel.is_cancelled();
        let mut stats = CycleStats {
            duration_ms: clock.elapsed().as_millis() as u64,
            ..CycleStats::default()
        };
        for status in &final_state.status {
            match status {
                NodeState::Completed => stats.nodes_executed += 1,
                NodeState::Failed => stats.nodes_failed += 1,
                NodeState::Cancelled => stats.nodes_cancelled += 1,
                _ => {}
            }
        }

        let values: HashMap<_, _> = values.into_iter().collect();
        let failures: HashMap<_, _> = failures.into_iter().collect();
        let mut terminal_values = BTreeMap::new();
        let mut failed_terminals = BTreeMap::new();
        for spec in graph.terminal_outputs().keys() {
            if let Some(value) = values.get(spec) {
                terminal_values.insert(spec.clone(), value.clone());
            } else if let Some(failure) = failures.get(spec) {
                failed_terminals.insert(spec.clone(), Arc::clone(failure));
            }
        }

        let result = CycleResult {
            cycle_id,
            started_at,
            completed_at: Utc::now(),
            values,
            terminal_values,
            failures,
            failed_terminals,
            unsatisfied: graph.unsatisfied().to_vec(),
            cancelled,
            stats,
        };

        if cancelled {
            warn!(
                "cycle {} cancelled after {} of {} nodes",
                cycle_id,
                stats.nodes_executed,
                graph.node_count()
            );
        } else {
            info!(
                "cycle {} finished in {}ms: {} executed, {} failed",
                cycle_id, stats.duration_ms, stats.nodes_executed, stats.nodes_failed
            );
            sink.deliver(&result);
        }
        result
    }

    fn worker_loop(
        &self,
        graph: &DependencyGraph,
        dispatch: &Mutex<DispatchState>,
        wakeup: &Condvar,
        values: &DashMap<ValueSpecification, ComputedValue>,
        failures: &DashMap<ValueSpecification, Arc<NodeFailure>>,
        cancel: &CancelToken,
    ) {
        loop {
            let index = {
                let mut state = dispatch.lock();
                loop {
                    if cancel.is_cancelled() {
                        // Nodes already running are left to finish and
                        // decrement outstanding themselves.
                        for slot in 0..state.status.len() {
                            if matches!(state.status[slot], NodeState::Pending | NodeState::Ready) {
                                state.status[slot] = NodeState::Cancelled;
                                state.outstanding -= 1;
                            }
                        }
                        state.ready.clear();
                        wakeup.notify_all();
                        return;
                    }
                    if let Some(index) = state.ready.pop_front() {
                        state.status[index.index()] = NodeState::Running;
                        break index;
                    }
                    if state.outstanding == 0 {
                        return;
                    }
                    wakeup.wait(&mut state);
                }
            };

            let node = graph.node(index);
            match self.run_node(node, values) {
                Ok(outputs) => {
                    for (spec, value) in outputs {
                        values.insert(spec, value);
                    }
                    let mut state = dispatch.lock();
                    state.status[index.index()] = NodeState::Completed;
                    state.outstanding -= 1;
                    for dependent in graph.dependents(index) {
                        let slot = dependent.index();
                        state.remaining[slot] -= 1;
                        if state.remaining[slot] == 0 && state.status[slot] == NodeState::Pending {
                            state.status[slot] = NodeState::Ready;
                            state.ready.push_back(dependent);
                        }
                    }
                    if state.outstanding == 0 || !state.ready.is_empty() {
                        wakeup.notify_all();
                    }
                }
                Err(reason) => {
                    let root = Arc::new(NodeFailure {
                        origin: node.primary_output().clone(),
                        reason,
                    });
                    warn!("node [{}] failed: {}", root.origin, root.reason);
                    for output in node.outputs() {
                        failures.insert(output.clone(), Arc::clone(&root));
                    }
                    let mut state = dispatch.lock();
                    state.status[index.index()] = NodeState::Failed;
                    state.outstanding -= 1;
                    // Downstream nodes can never become ready (their
                    // counters only fall on success), so marking them
                    // failed here retires them.
                    for downstream in graph.downstream_of(index) {
                        let slot = downstream.index();
                        if state.status[slot] == NodeState::Pending {
                            state.status[slot] = NodeState::Failed;
                            state.outstanding -= 1;
                            for output in graph.node(downstream).outputs() {
                                failures.insert(output.clone(), Arc::clone(&root));
                            }
                        }
                    }
                    if state.outstanding == 0 {
                        wakeup.notify_all();
                    }
                }
            }
        }
    }

    /// Execute a single node, returning its output values.
    fn run_node(
        &self,
        node: &Arc<DependencyNode>,
        values: &DashMap<ValueSpecification, ComputedValue>,
    ) -> Result<Vec<(ValueSpecification, ComputedValue)>, String> {
        if node.is_market_data() {
            let spec = node.primary_output();
            return match self.provider.value(spec) {
                Some(value) => Ok(vec![(spec.clone(), value)]),
                None => Err("market data not available at execution time".to_string()),
            };
        }

        let function = node
            .function()
            .ok_or_else(|| "node has no function".to_string())?;
        let body = self
            .catalog
            .body(function)
            .ok_or_else(|| format!("function {} missing from catalog", function))?;

        let mut entries = Vec::with_capacity(node.inputs().len());
        for spec in node.inputs() {
            let value = values
                .get(spec)
                .map(|v| v.clone())
                .ok_or_else(|| format!("input [{}] was never produced", spec))?;
            entries.push((spec.clone(), value));
        }
        let input_items: usize = entries.iter().map(|(_, v)| v.item_count()).sum();
        let inputs = FunctionInputs::new(entries);

        let clock = Instant::now();
        let mut produced = body
            .execute(node.target(), &inputs)
            .map_err(|e| e.to_string())?;
        let elapsed_ms = clock.elapsed().as_secs_f64() * 1000.0;

        let mut outputs = Vec::with_capacity(node.outputs().len());
        for spec in node.outputs() {
            let value = produced
                .remove(spec.value_name())
                .ok_or_else(|| format!("function {} produced no '{}'", function, spec.value_name()))?;
            outputs.push((spec.clone(), value));
        }
        let output_items: usize = outputs.iter().map(|(_, v)| v.item_count()).sum();
        self.record_cost(function, elapsed_ms, input_items, output_items);
        Ok(outputs)
    }

    fn record_cost(&self, function: &FunctionId, elapsed_ms: f64, inputs: usize, outputs: usize) {
        self.cost.update(function, elapsed_ms, inputs, outputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::compiled::FunctionCatalog;
    use crate::catalog::descriptor::{
        FunctionDescriptor, FunctionError, InputRule,
    };
    use crate::core::properties::ValueProperties;
    use crate::core::requirement::ValueRequirement;
    use crate::core::target::{ComputationTargetSpec, ComputationTargetType};
    use crate::exec::market::SnapshotMarketData;
    use crate::exec::sink::InMemorySink;
    use crate::resolver::GraphResolver;

    fn scalar_body(
        f: impl Fn(f64) -> f64 + Send + Sync + 'static,
        output: &'static str,
    ) -> impl crate::catalog::descriptor::FunctionBody {
        move |_: &ComputationTargetSpec, inputs: &FunctionInputs| {
            let x = inputs
                .iter()
                .next()
                .and_then(|(_, v)| v.as_scalar())
                .ok_or_else(|| FunctionError::MissingInput("scalar input".to_string()))?;
            let mut out = HashMap::new();
            out.insert(output.to_string(), ComputedValue::Scalar(f(x)));
            Ok::<_, FunctionError>(out)
        }
    }

    fn harness(
        catalog: FunctionCatalog,
        market: SnapshotMarketData,
    ) -> (GraphResolver, CycleExecutor, Arc<CostModel>) {
        let compiled = catalog.compile();
        let cost = Arc::new(CostModel::default());
        let market = Arc::new(market);
        let resolver = GraphResolver::new(
            Arc::clone(&compiled),
            Arc::clone(&cost),
            Arc::clone(&market) as Arc<dyn crate::exec::market::MarketDataAvailability>,
        );
        let executor = CycleExecutor::new(compiled, Arc::clone(&cost), market)
            .with_config(ExecutorConfig { workers: 2 });
        (resolver, executor, cost)
    }

    #[test]
    fn test_chain_executes_end_to_end() {
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("Doubler", ComputationTargetType::Position)
                .produces("PRESENT_VALUE", ValueProperties::none())
                .requires(InputRule::new("SPOT_RATE").on_primitive()),
            scalar_body(|x| x * 2.0, "PRESENT_VALUE"),
        );
        let target = ComputationTargetSpec::position("DbPos~1");
        let mut market = SnapshotMarketData::new();
        market.insert(
            "SPOT_RATE",
            target.primitive_counterpart(),
            ComputedValue::Scalar(21.0),
        );
        let (resolver, executor, cost) = harness(catalog, market);

        let graph = resolver
            .resolve(&[ValueRequirement::simple("PRESENT_VALUE", target)])
            .unwrap();
        let sink = InMemorySink::new();
        let result = executor.execute_cycle(&graph, &sink, &CancelToken::new());

        assert!(result.is_complete());
        assert_eq!(result.terminal_values.len(), 1);
        let value = result.terminal_values.values().next().unwrap();
        assert_eq!(value.as_scalar(), Some(42.0));
        assert_eq!(result.stats.nodes_executed, 2);
        assert_eq!(sink.len(), 1);
        // The doubler's invocation was folded into the cost model.
        assert!(cost.record(&"Doubler".into()).is_some());
    }

    #[test]
    fn test_failure_poisons_only_downstream() {
        // A -> B -> C with D independent; B fails, so C reports B's
        // root cause while D still produces a value.
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("AFn", ComputationTargetType::Position)
                .produces("A", ValueProperties::none()),
            |_: &ComputationTargetSpec, _: &FunctionInputs| {
                let mut out = HashMap::new();
                out.insert("A".to_string(), ComputedValue::Scalar(1.0));
                Ok::<_, FunctionError>(out)
            },
        );
        catalog.register(
            FunctionDescriptor::new("BFn", ComputationTargetType::Position)
                .produces("B", ValueProperties::none())
                .requires(InputRule::new("A")),
            |_: &ComputationTargetSpec, _: &FunctionInputs| {
                Err::<HashMap<String, ComputedValue>, _>(FunctionError::Evaluation(
                    "model blew up".to_string(),
                ))
            },
        );
        catalog.register(
            FunctionDescriptor::new("CFn", ComputationTargetType::Position)
                .produces("C", ValueProperties::none())
                .requires(InputRule::new("B")),
            scalar_body(|x| x, "C"),
        );
        catalog.register(
            FunctionDescriptor::new("DFn", ComputationTargetType::Position)
                .produces("D", ValueProperties::none()),
            |_: &ComputationTargetSpec, _: &FunctionInputs| {
                let mut out = HashMap::new();
                out.insert("D".to_string(), ComputedValue::Scalar(4.0));
                Ok::<_, FunctionError>(out)
            },
        );
        let target = ComputationTargetSpec::position("DbPos~1");
        let (resolver, executor, _) = harness(catalog, SnapshotMarketData::new());

        let graph = resolver
            .resolve(&[
                ValueRequirement::simple("C", target.clone()),
                ValueRequirement::simple("D", target),
            ])
            .unwrap();
        let sink = InMemorySink::new();
        let result = executor.execute_cycle(&graph, &sink, &CancelToken::new());

        assert!(!result.is_complete());
        assert_eq!(result.terminal_values.len(), 1);
        assert_eq!(result.failed_terminals.len(), 1);
        let (failed, cause) = result.failed_terminals.iter().next().unwrap();
        assert_eq!(failed.value_name(), "C");
        assert_eq!(cause.origin.value_name(), "B");
        assert!(cause.reason.contains("model blew up"));
        // A ran, B failed, C was poisoned, D ran.
        assert_eq!(result.stats.nodes_executed, 2);
        assert_eq!(result.stats.nodes_failed, 2);
        // Partial results still reach the sink.
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_missing_market_data_fails_leaf() {
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("PvFn", ComputationTargetType::Position)
                .produces("PRESENT_VALUE", ValueProperties::none())
                .requires(InputRule::new("SPOT_RATE").on_primitive()),
            scalar_body(|x| x, "PRESENT_VALUE"),
        );
        let target = ComputationTargetSpec::position("DbPos~1");
        // Available at resolution time, then withheld at execution.
        let mut resolution_market = SnapshotMarketData::new();
        resolution_market.insert(
            "SPOT_RATE",
            target.primitive_counterpart(),
            ComputedValue::Scalar(0.05),
        );
        let compiled = catalog.compile();
        let cost = Arc::new(CostModel::default());
        let resolver = GraphResolver::new(
            Arc::clone(&compiled),
            Arc::clone(&cost),
            Arc::new(resolution_market),
        );
        let executor = CycleExecutor::new(compiled, cost, Arc::new(SnapshotMarketData::new()))
            .with_config(ExecutorConfig { workers: 1 });

        let graph = resolver
            .resolve(&[ValueRequirement::simple("PRESENT_VALUE", target)])
            .unwrap();
        let sink = InMemorySink::new();
        let result = executor.execute_cycle(&graph, &sink, &CancelToken::new());

        assert_eq!(result.stats.nodes_failed, 2);
        assert_eq!(result.failed_terminals.len(), 1);
        let cause = result.failed_terminals.values().next().unwrap();
        assert!(cause.reason.contains("market data not available"));
    }

    #[test]
    fn test_pre_cancelled_cycle_runs_nothing() {
        let mut catalog = FunctionCatalog::new();
        catalog.register(
            FunctionDescriptor::new("AFn", ComputationTargetType::Position)
                .produces("A", ValueProperties::none()),
            |_: &ComputationTargetSpec, _: &FunctionInputs| {
                let mut out = HashMap::new();
                out.insert("A".to_string(), ComputedValue::Scalar(1.0));
                Ok::<_, FunctionError>(out)
            },
        );
        let target = ComputationTargetSpec::position("DbPos~1");
        let (resolver, executor, _) = harness(catalog, SnapshotMarketData::new());

        let graph = resolver
            .resolve(&[ValueRequirement::simple("A", target)])
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let sink = InMemorySink::new();
        let result = executor.execute_cycle(&graph, &sink, &cancel);

        assert!(result.cancelled);
        assert_eq!(result.stats.nodes_executed, 0);
        assert_eq!(result.stats.nodes_cancelled, 1);
        // Cancelled cycles never reach the sink.
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn test_unsatisfied_requirements_carried_into_result() {
        let target = ComputationTargetSpec::position("DbPos~1");
        let (resolver, executor, _) = harness(FunctionCatalog::new(), SnapshotMarketData::new());

        let graph = resolver
            .resolve(&[ValueRequirement::simple("NOWHERE", target)])
            .unwrap();
        let sink = InMemorySink::new();
        let result = executor.execute_cycle(&graph, &sink, &CancelToken::new());

        assert!(!result.is_complete());
        assert_eq!(result.unsatisfied.len(), 1);
        assert_eq!(result.stats.nodes_executed, 0);
    }
}
