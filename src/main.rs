//! depgraph-engine CLI
//!
//! Resolve and execute synthetic calculation universes from the
//! command line.
//!
//! # Usage
//!
//! ```bash
//! # Resolve a universe and print the graph shape
//! depgraph-engine plan --targets 100 --depth 4
//!
//! # Resolve and execute a full cycle
//! depgraph-engine run --targets 100 --workers 8
//!
//! # Persist cost statistics across runs
//! depgraph-engine run --targets 100 --cost-stats costs.json
//!
//! # Output as JSON
//! depgraph-engine run --targets 100 --format json
//! ```

use depgraph_engine::exec::scheduler::{CancelToken, ExecutorConfig};
use depgraph_engine::exec::sink::InMemorySink;
use depgraph_engine::simulation::stress_test::{generate_universe, UniverseConfig};
use std::fs;
use std::process;

fn print_usage() {
    eprintln!(
        r#"depgraph-engine — dependency-graph resolution and execution scheduling

USAGE:
    depgraph-engine <COMMAND> [OPTIONS]

COMMANDS:
    plan        Resolve a universe and report the resulting graph
    run         Resolve a universe, execute one cycle, report results
    help        Show this message

OPTIONS (plan, run):
    --targets <N>       Number of position targets (default: 10)
    --depth <N>         Function layers per target (default: 3)
    --fan-out <N>       Values per layer (default: 2)
    --seed <N>          Market data seed (default: 42)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (run):
    --workers <N>       Worker threads (default: logical CPUs)
    --cost-stats <FILE> Load cost statistics before the run and save
                        the updated statistics back after it

EXAMPLES:
    depgraph-engine plan --targets 1000 --depth 4 --fan-out 3
    depgraph-engine run --targets 100 --workers 4
    depgraph-engine run --targets 100 --cost-stats costs.json --format json"#
    );
}

struct CliOptions {
    universe: UniverseConfig,
    workers: Option<usize>,
    cost_stats: Option<String>,
    format: String,
}

fn parse_options(args: &[String]) -> CliOptions {
    let mut options = CliOptions {
        universe: UniverseConfig::default(),
        workers: None,
        cost_stats: None,
        format: "text".to_string(),
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--targets" => {
                i += 1;
                options.universe.target_count = parse_number(args.get(i), "--targets");
            }
            "--depth" => {
                i += 1;
                options.universe.chain_depth = parse_number(args.get(i), "--depth");
            }
            "--fan-out" => {
                i += 1;
                options.universe.fan_out = parse_number(args.get(i), "--fan-out");
            }
            "--seed" => {
                i += 1;
                options.universe.seed = parse_number(args.get(i), "--seed");
            }
            "--workers" => {
                i += 1;
                options.workers = Some(parse_number(args.get(i), "--workers"));
            }
            "--cost-stats" => {
                i += 1;
                options.cost_stats = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--cost-stats requires a file path");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                options.format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }
    options
}

fn parse_number<T: std::str::FromStr>(arg: Option<&String>, flag: &str) -> T {
    arg.and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{} requires a number", flag);
        process::exit(1);
    })
}

/// JSON output schema for `plan`.
#[derive(serde::Serialize)]
struct PlanOutput {
    targets: usize,
    requirements: usize,
    nodes: usize,
    edges: usize,
    market_data_leaves: usize,
    unsatisfied: usize,
    candidates_evaluated: u64,
}

/// JSON output schema for `run`.
#[derive(serde::Serialize)]
struct RunOutput {
    cycle_id: String,
    complete: bool,
    nodes_executed: usize,
    nodes_failed: usize,
    duration_ms: u64,
    terminal_values: Vec<TerminalOutput>,
    failed_terminals: Vec<String>,
    unsatisfied: Vec<String>,
}

#[derive(serde::Serialize)]
struct TerminalOutput {
    specification: String,
    value: Option<f64>,
}

fn cmd_plan(args: &[String]) {
    let options = parse_options(args);
    let universe = generate_universe(&options.universe);
    let (resolver, _, _) = universe.engine();

    let graph = resolver
        .resolve_parallel(&universe.requirements)
        .unwrap_or_else(|e| {
            eprintln!("Resolution failed: {}", e);
            process::exit(1);
        });

    if options.format == "json" {
        let output = PlanOutput {
            targets: universe.targets.len(),
            requirements: universe.requirements.len(),
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            market_data_leaves: graph.market_data_specs().len(),
            unsatisfied: graph.unsatisfied().len(),
            candidates_evaluated: resolver.metrics().candidates_evaluated,
        };
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        println!("{}", graph);
        println!("Requirements:          {}", universe.requirements.len());
        println!("Market data leaves:    {}", graph.market_data_specs().len());
        println!(
            "Candidates evaluated:  {}",
            resolver.metrics().candidates_evaluated
        );
        for unsatisfied in graph.unsatisfied() {
            println!("  unsatisfied: {}", unsatisfied);
        }
    }
}

fn cmd_run(args: &[String]) {
    let options = parse_options(args);
    let universe = generate_universe(&options.universe);
    let (resolver, executor, cost) = universe.engine();

    if let Some(path) = &options.cost_stats {
        match fs::File::open(path) {
            Ok(file) => {
                if let Err(e) = cost.load_from(file) {
                    eprintln!("Error parsing cost statistics '{}': {}", path, e);
                    process::exit(1);
                }
            }
            Err(_) => {
                // First run; the file is written on the way out.
            }
        }
    }

    let executor = match options.workers {
        Some(workers) => executor.with_config(ExecutorConfig { workers }),
        None => executor,
    };

    let graph = resolver
        .resolve_parallel(&universe.requirements)
        .unwrap_or_else(|e| {
            eprintln!("Resolution failed: {}", e);
            process::exit(1);
        });
    let sink = InMemorySink::new();
    let result = executor.execute_cycle(&graph, &sink, &CancelToken::new());

    if let Some(path) = &options.cost_stats {
        let file = fs::File::create(path).unwrap_or_else(|e| {
            eprintln!("Error writing cost statistics '{}': {}", path, e);
            process::exit(1);
        });
        if let Err(e) = cost.save_to(file) {
            eprintln!("Error serializing cost statistics: {}", e);
            process::exit(1);
        }
    }

    if options.format == "json" {
        let output = RunOutput {
            cycle_id: result.cycle_id.to_string(),
            complete: result.is_complete(),
            nodes_executed: result.stats.nodes_executed,
            nodes_failed: result.stats.nodes_failed,
            duration_ms: result.stats.duration_ms,
            terminal_values: result
                .terminal_values
                .iter()
                .map(|(spec, value)| TerminalOutput {
                    specification: spec.to_string(),
                    value: value.as_scalar(),
                })
                .collect(),
            failed_terminals: result
                .failed_terminals
                .keys()
                .map(|spec| spec.to_string())
                .collect(),
            unsatisfied: result
                .unsatisfied
                .iter()
                .map(|u| u.to_string())
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        println!("Cycle {}", result.cycle_id);
        println!("  Nodes executed:  {}", result.stats.nodes_executed);
        println!("  Nodes failed:    {}", result.stats.nodes_failed);
        println!("  Duration:        {}ms", result.stats.duration_ms);
        println!("  Complete:        {}", result.is_complete());
        for (spec, value) in &result.terminal_values {
            println!("  {} = {}", spec, value);
        }
        for (spec, failure) in &result.failed_terminals {
            println!("  {} FAILED: {}", spec, failure.reason);
        }
        for unsatisfied in &result.unsatisfied {
            println!("  unsatisfied: {}", unsatisfied);
        }
        println!("{}", cost);
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "plan" => cmd_plan(rest),
        "run" => cmd_run(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
