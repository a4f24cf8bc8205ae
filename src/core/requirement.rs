use crate::core::properties::ValueProperties;
use crate::core::target::ComputationTargetSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A request for a named value on a target, qualified by a constraint set.
///
/// Requirements are what callers submit to the resolver. They are immutable
/// value types with structural equality; two requirements asking for the
/// same value under the same constraints are interchangeable.
///
/// # Examples
///
/// ```
/// use depgraph_engine::core::properties::ValueProperties;
/// use depgraph_engine::core::requirement::ValueRequirement;
/// use depgraph_engine::core::target::ComputationTargetSpec;
///
/// let target = ComputationTargetSpec::position("DbPos~1234");
/// let req = ValueRequirement::new(
///     "PRESENT_VALUE",
///     target,
///     ValueProperties::none().with_value("Currency", "USD"),
/// );
/// assert_eq!(req.value_name(), "PRESENT_VALUE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    value_name: String,
    target: ComputationTargetSpec,
    constraints: ValueProperties,
}

impl ValueRequirement {
    /// Create a new requirement.
    ///
    /// # Panics
    ///
    /// Panics if `value_name` is empty.
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpec,
        constraints: ValueProperties,
    ) -> Self {
        let value_name = value_name.into();
        assert!(!value_name.is_empty(), "value name must not be empty");
        Self {
            value_name,
            target,
            constraints,
        }
    }

    /// A requirement with no property constraints.
    pub fn simple(value_name: impl Into<String>, target: ComputationTargetSpec) -> Self {
        Self::new(value_name, target, ValueProperties::none())
    }

    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    pub fn target(&self) -> &ComputationTargetSpec {
        &self.target
    }

    pub fn constraints(&self) -> &ValueProperties {
        &self.constraints
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            write!(f, "{} on {}", self.value_name, self.target)
        } else {
            write!(f, "{} on {} {}", self.value_name, self.target, self.constraints)
        }
    }
}
