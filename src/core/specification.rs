use crate::catalog::descriptor::FunctionId;
use crate::core::properties::ValueProperties;
use crate::core::requirement::ValueRequirement;
use crate::core::target::ComputationTargetSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The resolved counterpart of a [`ValueRequirement`].
///
/// A specification names a value on a target with a fully or partially
/// pinned property set, and always carries the identity of the function
/// that will produce it (or the reserved market-data sourcing identity
/// for raw observations). Specifications are produced only by the
/// resolver; equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    value_name: String,
    target: ComputationTargetSpec,
    properties: ValueProperties,
    function: FunctionId,
}

impl ValueSpecification {
    /// Create a new specification.
    ///
    /// # Panics
    ///
    /// Panics if `value_name` is empty.
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpec,
        properties: ValueProperties,
        function: FunctionId,
    ) -> Self {
        let value_name = value_name.into();
        assert!(!value_name.is_empty(), "value name must not be empty");
        Self {
            value_name,
            target,
            properties,
            function,
        }
    }

    /// The specification a market-data observation satisfies for `req`.
    ///
    /// Carries the requirement's constraints as its pinned properties and
    /// the reserved market-data sourcing function identity.
    pub fn market_data(req: &ValueRequirement) -> Self {
        Self {
            value_name: req.value_name().to_string(),
            target: req.target().clone(),
            properties: req.constraints().clone(),
            function: FunctionId::market_data(),
        }
    }

    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    pub fn target(&self) -> &ComputationTargetSpec {
        &self.target
    }

    pub fn properties(&self) -> &ValueProperties {
        &self.properties
    }

    pub fn function(&self) -> &FunctionId {
        &self.function
    }

    pub fn is_market_data(&self) -> bool {
        self.function == FunctionId::market_data()
    }

    /// Whether this specification satisfies a requirement: same value name,
    /// same target, properties meeting every constraint.
    pub fn satisfies(&self, req: &ValueRequirement) -> bool {
        self.value_name == req.value_name()
            && self.target == *req.target()
            && self.properties.satisfies(req.constraints())
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} {} <- {}",
            self.value_name, self.target, self.properties, self.function
        )
    }
}
