//! Running resolved graphs: market data interfaces, the worker-pool
//! scheduler and result delivery.

pub mod market;
pub mod scheduler;
pub mod sink;
