use crate::core::properties::{PropertyConstraint, ValueProperties};
use crate::core::specification::ValueSpecification;
use crate::core::target::{ComputationTargetSpec, ComputationTargetType};
use crate::core::value::ComputedValue;
use crate::core::requirement::ValueRequirement;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Reserved identity for values sourced directly from market data.
const MARKET_DATA_FUNCTION: &str = "MarketDataSourcing";

/// Unique identifier of a compute function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved identity carried by market-data specifications.
    pub fn market_data() -> Self {
        Self(MARKET_DATA_FUNCTION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FunctionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors raised at the function-body boundary.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("missing input value {0}")]
    MissingInput(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

/// A value template a function declares it can produce for its target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTemplate {
    pub value_name: String,
    pub properties: ValueProperties,
}

/// Which target an input requirement is addressed to, relative to the
/// target the function runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputTargetSelector {
    /// The same target as the function invocation.
    Same,
    /// The primitive-typed target with the same identifier (market
    /// constructs keyed like the position/security).
    Primitive,
    // TODO: a Linked selector resolving through security links once the
    // target-universe resolver exposes them.
}

/// A data-driven declaration of one input requirement.
///
/// Inputs may depend on which output properties were pinned: each name in
/// `inherit` copies the resolved output's constraint for that property
/// into the input's constraint set (a pinned `CurveName` on the output
/// narrows which upstream curve is requested).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRule {
    pub value_name: String,
    pub constraints: ValueProperties,
    pub inherit: Vec<String>,
    pub target: InputTargetSelector,
}

impl InputRule {
    pub fn new(value_name: impl Into<String>) -> Self {
        Self {
            value_name: value_name.into(),
            constraints: ValueProperties::none(),
            inherit: Vec::new(),
            target: InputTargetSelector::Same,
        }
    }

    pub fn with_constraints(mut self, constraints: ValueProperties) -> Self {
        self.constraints = constraints;
        self
    }

    /// Copy the resolved output's constraint for `property` onto this input.
    pub fn inherit(mut self, property: impl Into<String>) -> Self {
        self.inherit.push(property.into());
        self
    }

    /// Address this input to the primitive counterpart of the target.
    pub fn on_primitive(mut self) -> Self {
        self.target = InputTargetSelector::Primitive;
        self
    }
}

/// Declared metadata of one compute function: what it can produce for a
/// target type and what it needs to do so.
///
/// Function bodies are opaque at this layer — descriptors carry only the
/// input/output contract the resolver reasons about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    id: FunctionId,
    priority: i32,
    target_type: ComputationTargetType,
    outputs: Vec<OutputTemplate>,
    inputs: Vec<InputRule>,
}

impl FunctionDescriptor {
    pub fn new(id: impl Into<FunctionId>, target_type: ComputationTargetType) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            target_type,
            outputs: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Declared priority; higher wins when resolution is otherwise tied.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare an output template.
    pub fn produces(mut self, value_name: impl Into<String>, properties: ValueProperties) -> Self {
        self.outputs.push(OutputTemplate {
            value_name: value_name.into(),
            properties,
        });
        self
    }

    /// Declare an input rule.
    pub fn requires(mut self, rule: InputRule) -> Self {
        self.inputs.push(rule);
        self
    }

    pub fn id(&self) -> &FunctionId {
        &self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn target_type(&self) -> ComputationTargetType {
        self.target_type
    }

    pub fn outputs(&self) -> &[OutputTemplate] {
        &self.outputs
    }

    /// The concrete specification this function would emit for `req`, or
    /// `None` when the output template is incompatible with the
    /// requirement's constraints.
    pub fn resolved_output(&self, req: &ValueRequirement) -> Option<ValueSpecification> {
        let template = self
            .outputs
            .iter()
            .find(|t| t.value_name == req.value_name())?;
        let properties = template.properties.intersect(req.constraints())?;
        Some(ValueSpecification::new(
            req.value_name(),
            req.target().clone(),
            properties,
            self.id.clone(),
        ))
    }

    /// The input requirements needed to produce `resolved` on `target`,
    /// or `None` when the resolved output cannot supply a property an
    /// input rule inherits (the candidate is unsatisfiable).
    pub fn requirements_for(
        &self,
        target: &ComputationTargetSpec,
        resolved: &ValueSpecification,
    ) -> Option<Vec<ValueRequirement>> {
        let mut requirements = Vec::with_capacity(self.inputs.len());
        for rule in &self.inputs {
            let mut constraints = rule.constraints.clone();
            for property in &rule.inherit {
                match resolved.properties().get(property) {
                    Some(PropertyConstraint::Any) => {}
                    Some(constraint) => constraints.insert(property.clone(), constraint.clone()),
                    None => return None,
                }
            }
            let input_target = match rule.target {
                InputTargetSelector::Same => target.clone(),
                InputTargetSelector::Primitive => target.primitive_counterpart(),
            };
            requirements.push(ValueRequirement::new(
                rule.value_name.clone(),
                input_target,
                constraints,
            ));
        }
        Some(requirements)
    }
}

/// Resolved input values handed to a function body at execution time.
#[derive(Debug, Clone, Default)]
pub struct FunctionInputs {
    entries: Vec<(ValueSpecification, ComputedValue)>,
}

impl FunctionInputs {
    pub fn new(entries: Vec<(ValueSpecification, ComputedValue)>) -> Self {
        Self { entries }
    }

    /// The first input value with the given value name.
    pub fn get(&self, value_name: &str) -> Option<&ComputedValue> {
        self.entries
            .iter()
            .find(|(spec, _)| spec.value_name() == value_name)
            .map(|(_, value)| value)
    }

    /// The first scalar input with the given value name.
    pub fn scalar(&self, value_name: &str) -> Result<f64, FunctionError> {
        self.get(value_name)
            .and_then(ComputedValue::as_scalar)
            .ok_or_else(|| FunctionError::MissingInput(value_name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValueSpecification, &ComputedValue)> {
        self.entries.iter().map(|(s, v)| (s, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total item count across all inputs, used for cost statistics.
    pub fn item_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.item_count()).sum()
    }
}

/// An opaque compute unit. Bodies receive the target and resolved inputs
/// and return one value per declared output name.
pub trait FunctionBody: Send + Sync {
    fn execute(
        &self,
        target: &ComputationTargetSpec,
        inputs: &FunctionInputs,
    ) -> Result<HashMap<String, ComputedValue>, FunctionError>;
}

impl<F> FunctionBody for F
where
    F: Fn(&ComputationTargetSpec, &FunctionInputs) -> Result<HashMap<String, ComputedValue>, FunctionError>
        + Send
        + Sync,
{
    fn execute(
        &self,
        target: &ComputationTargetSpec,
        inputs: &FunctionInputs,
    ) -> Result<HashMap<String, ComputedValue>, FunctionError> {
        self(target, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_descriptor() -> FunctionDescriptor {
        FunctionDescriptor::new("SabrSurfaceFn", ComputationTargetType::Security)
            .with_priority(10)
            .produces(
                "VOLATILITY_SURFACE",
                ValueProperties::none()
                    .with_value("Model", "SABR")
                    .with_any("CurveName"),
            )
            .requires(
                InputRule::new("DISCOUNT_CURVE")
                    .inherit("CurveName")
                    .on_primitive(),
            )
    }

    #[test]
    fn test_resolved_output_pins_constraints() {
        let descriptor = surface_descriptor();
        let req = ValueRequirement::new(
            "VOLATILITY_SURFACE",
            ComputationTargetSpec::security("Sec~1"),
            ValueProperties::none().with_value("CurveName", "USD-OIS"),
        );

        let spec = descriptor.resolved_output(&req).unwrap();
        assert_eq!(spec.properties().pinned_value("Model"), Some("SABR"));
        assert_eq!(spec.properties().pinned_value("CurveName"), Some("USD-OIS"));
        assert_eq!(spec.function(), descriptor.id());
    }

    #[test]
    fn test_resolved_output_rejects_incompatible() {
        let descriptor = surface_descriptor();
        let req = ValueRequirement::new(
            "VOLATILITY_SURFACE",
            ComputationTargetSpec::security("Sec~1"),
            ValueProperties::none().with_value("Model", "SVI"),
        );
        assert!(descriptor.resolved_output(&req).is_none());
    }

    #[test]
    fn test_inputs_inherit_pinned_output_property() {
        let descriptor = surface_descriptor();
        let target = ComputationTargetSpec::security("Sec~1");
        let req = ValueRequirement::new(
            "VOLATILITY_SURFACE",
            target.clone(),
            ValueProperties::none().with_value("CurveName", "USD-OIS"),
        );
        let spec = descriptor.resolved_output(&req).unwrap();

        let inputs = descriptor.requirements_for(&target, &spec).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].value_name(), "DISCOUNT_CURVE");
        assert_eq!(
            inputs[0].constraints().pinned_value("CurveName"),
            Some("USD-OIS")
        );
        assert_eq!(
            inputs[0].target().target_type(),
            ComputationTargetType::Primitive
        );
    }

    #[test]
    fn test_unpinned_inherit_leaves_input_open() {
        let descriptor = surface_descriptor();
        let target = ComputationTargetSpec::security("Sec~1");
        // No CurveName constraint: the template wildcard survives.
        let req = ValueRequirement::simple("VOLATILITY_SURFACE", target.clone());
        let spec = descriptor.resolved_output(&req).unwrap();

        let inputs = descriptor.requirements_for(&target, &spec).unwrap();
        assert!(inputs[0].constraints().get("CurveName").is_none());
    }

    #[test]
    fn test_function_inputs_lookup() {
        let spec = ValueSpecification::new(
            "DISCOUNT_CURVE",
            ComputationTargetSpec::primitive("Curve~USD"),
            ValueProperties::none(),
            FunctionId::new("CurveFn"),
        );
        let inputs = FunctionInputs::new(vec![(spec, ComputedValue::Scalar(0.05))]);
        assert_eq!(inputs.scalar("DISCOUNT_CURVE").unwrap(), 0.05);
        assert!(inputs.scalar("MISSING").is_err());
        assert_eq!(inputs.item_count(), 1);
    }
}
