use crate::exec::scheduler::CycleResult;
use dashmap::DashMap;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Receives completed cycle results.
///
/// Delivery happens once per finished cycle, from whichever worker
/// thread observes completion, so implementations must be thread-safe.
/// Implementations should tolerate redelivery of the same cycle id.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, result: &CycleResult);
}

/// Keeps delivered cycles in memory, deduplicated by cycle id.
///
/// The workhorse sink for tests and the demo binary. Results are
/// stored behind `Arc` so callers can hold onto a cycle after the sink
/// is dropped.
#[derive(Default)]
pub struct InMemorySink {
    cycles: DashMap<Uuid, Arc<StoredCycle>>,
}

/// The owned subset of a [`CycleResult`] a sink can retain; the full
/// result borrows nothing, but keeping only values and failures is
/// enough for inspection and keeps retained cycles small.
#[derive(Debug)]
pub struct StoredCycle {
    pub cycle_id: Uuid,
    pub terminal_values: HashMap<String, f64>,
    pub failed_terminal_count: usize,
    pub unsatisfied_count: usize,
    pub complete: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn cycle(&self, cycle_id: Uuid) -> Option<Arc<StoredCycle>> {
        self.cycles.get(&cycle_id).map(|c| Arc::clone(&c))
    }
}

impl ResultSink for InMemorySink {
    fn deliver(&self, result: &CycleResult) {
        let stored = StoredCycle {
            cycle_id: result.cycle_id,
            terminal_values: result
                .terminal_values
                .iter()
                .filter_map(|(spec, value)| {
                    value.as_scalar().map(|v| (spec.to_string(), v))
                })
                .collect(),
            failed_terminal_count: result.failed_terminals.len(),
            unsatisfied_count: result.unsatisfied.len(),
            complete: result.is_complete(),
        };
        if self.cycles.insert(result.cycle_id, Arc::new(stored)).is_some() {
            debug!("cycle {} redelivered, keeping latest", result.cycle_id);
        }
    }
}

/// Discards everything. For benchmarks and cycles run purely for their
/// cost-model side effects.
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn deliver(&self, _result: &CycleResult) {}
}
