//! # depgraph-engine
//!
//! Dependency-graph construction and execution scheduling for bulk
//! calculations over financial targets.
//!
//! Callers declare *what* they want — named values on portfolios,
//! positions or securities, qualified by property constraints — and a
//! backtracking resolver works out *how* to compute them from a catalog
//! of functions and available market data. The resolved graph is then
//! executed by a worker pool in dependency order, with failures
//! isolated to their downstream cone.
//!
//! ## Architecture
//!
//! - **core** — Value model: targets, properties, requirements, specifications
//! - **catalog** — Function contracts, bodies and the compiled dispatch index
//! - **cost** — Decaying per-function cost statistics driving candidate order
//! - **resolver** — Backtracking requirement-to-graph search
//! - **graph** — The immutable, topologically ordered dependency graph
//! - **cache** — Graph caching with incremental rebuilds
//! - **exec** — Market data interfaces, the cycle executor, result sinks
//! - **simulation** — Seeded synthetic universes for stress runs

pub mod cache;
pub mod catalog;
pub mod core;
pub mod cost;
pub mod exec;
pub mod graph;
pub mod resolver;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::cache::{CacheOutcome, GraphCache};
    pub use crate::catalog::compiled::{CompiledCatalog, FunctionCatalog};
    pub use crate::catalog::descriptor::{FunctionDescriptor, FunctionId, InputRule};
    pub use crate::core::properties::{PropertyConstraint, ValueProperties};
    pub use crate::core::requirement::ValueRequirement;
    pub use crate::core::specification::ValueSpecification;
    pub use crate::core::target::{ComputationTargetSpec, ComputationTargetType};
    pub use crate::core::value::ComputedValue;
    pub use crate::cost::CostModel;
    pub use crate::exec::market::{MarketDataAvailability, MarketDataProvider, SnapshotMarketData};
    pub use crate::exec::scheduler::{CancelToken, CycleExecutor, CycleResult};
    pub use crate::exec::sink::{InMemorySink, ResultSink};
    pub use crate::graph::dep_graph::DependencyGraph;
    pub use crate::resolver::GraphResolver;
}
