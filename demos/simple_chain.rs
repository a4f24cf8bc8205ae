//! Resolving and executing a simple pricing chain.
//!
//! Demonstrates how a single PRESENT_VALUE requirement is resolved
//! backwards through the function catalog down to a market data leaf,
//! then executed.

use depgraph_engine::catalog::compiled::FunctionCatalog;
use depgraph_engine::catalog::descriptor::{
    FunctionDescriptor, FunctionError, FunctionInputs, InputRule,
};
use depgraph_engine::core::properties::ValueProperties;
use depgraph_engine::core::requirement::ValueRequirement;
use depgraph_engine::core::target::{ComputationTargetSpec, ComputationTargetType};
use depgraph_engine::core::value::ComputedValue;
use depgraph_engine::cost::CostModel;
use depgraph_engine::exec::market::SnapshotMarketData;
use depgraph_engine::exec::scheduler::{CancelToken, CycleExecutor};
use depgraph_engine::exec::sink::InMemorySink;
use depgraph_engine::resolver::GraphResolver;
use std::collections::HashMap;
use std::sync::Arc;

fn main() {
    println!("╔═════════════════════════════════════════════╗");
    println!("║  depgraph-engine: Simple Chain Resolution   ║");
    println!("╚═════════════════════════════════════════════╝\n");

    // --- A two-function catalog over one market data leaf ---

    let mut catalog = FunctionCatalog::new();
    catalog.register(
        FunctionDescriptor::new("PresentValueFn", ComputationTargetType::Position)
            .produces("PRESENT_VALUE", ValueProperties::none())
            .requires(InputRule::new("DISCOUNTED_CASHFLOWS")),
        |_: &ComputationTargetSpec, inputs: &FunctionInputs| {
            let dcf = inputs.scalar("DISCOUNTED_CASHFLOWS")?;
            let mut out = HashMap::new();
            out.insert("PRESENT_VALUE".to_string(), ComputedValue::Scalar(dcf));
            Ok::<_, FunctionError>(out)
        },
    );
    catalog.register(
        FunctionDescriptor::new("DiscountingFn", ComputationTargetType::Position)
            .produces("DISCOUNTED_CASHFLOWS", ValueProperties::none())
            .requires(InputRule::new("SPOT_RATE").on_primitive()),
        |_: &ComputationTargetSpec, inputs: &FunctionInputs| {
            let rate = inputs.scalar("SPOT_RATE")?;
            let mut out = HashMap::new();
            out.insert(
                "DISCOUNTED_CASHFLOWS".to_string(),
                ComputedValue::Scalar(1_000_000.0 / (1.0 + rate)),
            );
            Ok::<_, FunctionError>(out)
        },
    );

    let target = ComputationTargetSpec::position("DbPos~1234");
    let mut market = SnapshotMarketData::new();
    market.insert(
        "SPOT_RATE",
        target.primitive_counterpart(),
        ComputedValue::Scalar(0.052),
    );
    let market = Arc::new(market);

    // --- Resolution ---

    let compiled = catalog.compile();
    let cost = Arc::new(CostModel::default());
    let resolver = GraphResolver::new(
        Arc::clone(&compiled),
        Arc::clone(&cost),
        Arc::clone(&market) as _,
    );

    let requirement = ValueRequirement::simple("PRESENT_VALUE", target);
    println!("Requirement: {}\n", requirement);

    let graph = resolver
        .resolve(std::slice::from_ref(&requirement))
        .expect("chain resolves");
    println!("{}", graph);
    for (position, &index) in graph.execution_order().iter().enumerate() {
        println!("  step {}: {}", position, graph.node(index));
    }
    println!();

    // --- Execution ---

    let executor = CycleExecutor::new(compiled, cost, market);
    let sink = InMemorySink::new();
    let result = executor.execute_cycle(&graph, &sink, &CancelToken::new());

    println!("Cycle {} complete: {}", result.cycle_id, result.is_complete());
    for (spec, value) in &result.terminal_values {
        println!("  {} = {}", spec, value);
    }
    println!("  {} nodes in {}ms", result.stats.nodes_executed, result.stats.duration_ms);
}
