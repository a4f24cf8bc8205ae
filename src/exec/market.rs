use crate::core::requirement::ValueRequirement;
use crate::core::specification::ValueSpecification;
use crate::core::target::ComputationTargetSpec;
use crate::core::value::ComputedValue;
use std::collections::HashMap;

/// Answers "could this requirement be sourced from market data?" during
/// resolution. Consulted only after every candidate function has been
/// tried and rejected.
pub trait MarketDataAvailability: Send + Sync {
    /// `Some` with the specification the sourced value would carry, or
    /// `None` if the requirement cannot be sourced.
    fn availability(&self, req: &ValueRequirement) -> Option<ValueSpecification>;
}

/// Supplies the actual values for market data leaf nodes at execution
/// time. Availability at resolution time does not guarantee a value
/// here; a `None` fails the leaf node like any other node failure.
pub trait MarketDataProvider: Send + Sync {
    fn value(&self, spec: &ValueSpecification) -> Option<ComputedValue>;
}

/// A fixed snapshot of market data, keyed by value name and target.
///
/// Implements both traits, so the same snapshot can drive resolution
/// and execution. This is the provider the simulator and the demos use;
/// a production deployment would back these traits with a live feed.
///
/// # Examples
///
/// ```
/// use depgraph_engine::core::target::ComputationTargetSpec;
/// use depgraph_engine::core::value::ComputedValue;
/// use depgraph_engine::exec::market::SnapshotMarketData;
///
/// let mut snapshot = SnapshotMarketData::new();
/// snapshot.insert(
///     "SPOT_RATE",
///     ComputationTargetSpec::primitive("Rate~USD"),
///     ComputedValue::Scalar(0.052),
/// );
/// assert_eq!(snapshot.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SnapshotMarketData {
    values: HashMap<(String, ComputationTargetSpec), ComputedValue>,
}

impl SnapshotMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        value_name: impl Into<String>,
        target: ComputationTargetSpec,
        value: ComputedValue,
    ) {
        self.values.insert((value_name.into(), target), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MarketDataAvailability for SnapshotMarketData {
    fn availability(&self, req: &ValueRequirement) -> Option<ValueSpecification> {
        let key = (req.value_name().to_string(), req.target().clone());
        if self.values.contains_key(&key) {
            Some(ValueSpecification::market_data(req))
        } else {
            None
        }
    }
}

impl MarketDataProvider for SnapshotMarketData {
    fn value(&self, spec: &ValueSpecification) -> Option<ComputedValue> {
        let key = (spec.value_name().to_string(), spec.target().clone());
        self.values.get(&key).cloned()
    }
}

/// Availability that never sources anything. Useful for catalogs that
/// are self-contained and in tests exercising unsatisfiable paths.
#[derive(Debug, Default)]
pub struct NoMarketData;

impl MarketDataAvailability for NoMarketData {
    fn availability(&self, _req: &ValueRequirement) -> Option<ValueSpecification> {
        None
    }
}

impl MarketDataProvider for NoMarketData {
    fn value(&self, _spec: &ValueSpecification) -> Option<ComputedValue> {
        None
    }
}
