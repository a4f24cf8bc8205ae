//! Failure isolation during cycle execution.
//!
//! Demonstrates that a failing function poisons only the nodes
//! downstream of it; independent calculations in the same cycle still
//! deliver their values, and every casualty reports the root cause.

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

fn constant(name: &'static str, value: f64) -> impl depgraph_engine::catalog::descriptor::FunctionBody {
    move |_: &ComputationTargetSpec, _: &FunctionInputs| {
        let mut out = HashMap::new();
        out.insert(name.to_string(), ComputedValue::Scalar(value));
        Ok::<_, FunctionError>(out)
    }
}

fn main() {
    println!("╔═════════════════════════════════════════════╗");
    println!("║  depgraph-engine: Partial Failure Example   ║");
    println!("╚═════════════════════════════════════════════╝\n");

    // Two independent chains on the same position:
    //   PRESENT_VALUE <- DISCOUNTED_CASHFLOWS          (healthy)
    //   STRESSED_PV   <- STRESS_SCENARIO               (scenario fails)

    let mut catalog = FunctionCatalog::new();
    catalog.register(
        FunctionDescriptor::new("CashflowFn", ComputationTargetType::Position)
            .produces("DISCOUNTED_CASHFLOWS", ValueProperties::none()),
        constant("DISCOUNTED_CASHFLOWS", 812_500.0),
    );
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
        FunctionDescriptor::new("StressScenarioFn", ComputationTargetType::Position)
            .produces("STRESS_SCENARIO", ValueProperties::none()),
        |_: &ComputationTargetSpec, _: &FunctionInputs| {
            Err::<HashMap<String, ComputedValue>, _>(FunctionError::Evaluation(
                "scenario calibration diverged".to_string(),
            ))
        },
    );
    catalog.register(
        FunctionDescriptor::new("StressedPvFn", ComputationTargetType::Position)
            .produces("STRESSED_PV", ValueProperties::none())
            .requires(InputRule::new("STRESS_SCENARIO")),
        |_: &ComputationTargetSpec, inputs: &FunctionInputs| {
            let shocked = inputs.scalar("STRESS_SCENARIO")?;
            let mut out = HashMap::new();
            out.insert("STRESSED_PV".to_string(), ComputedValue::Scalar(shocked));
            Ok::<_, FunctionError>(out)
        },
    );

    let compiled = catalog.compile();
    let cost = Arc::new(CostModel::default());
    let market = Arc::new(SnapshotMarketData::new());
    let resolver = GraphResolver::new(
        Arc::clone(&compiled),
        Arc::clone(&cost),
        Arc::clone(&market) as _,
    );

    let target = ComputationTargetSpec::position("DbPos~1234");
    let graph = resolver
        .resolve(&[
            ValueRequirement::simple("PRESENT_VALUE", target.clone()),
            ValueRequirement::simple("STRESSED_PV", target),
        ])
        .expect("both chains resolve");
    println!("{}\n", graph);

    let executor = CycleExecutor::new(compiled, cost, market);
    let result = executor.execute_cycle(&graph, &InMemorySink::new(), &CancelToken::new());

    println!("Complete: {}", result.is_complete());
    println!("\nDelivered values:");
    for (spec, value) in &result.terminal_values {
        println!("  {} = {}", spec, value);
    }
    println!("\nFailed terminals:");
    for (spec, failure) in &result.failed_terminals {
        println!("  {} — root cause [{}]: {}", spec, failure.origin, failure.reason);
    }
    println!(
        "\n{} executed, {} failed",
        result.stats.nodes_executed, result.stats.nodes_failed
    );
}
