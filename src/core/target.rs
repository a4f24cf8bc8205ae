use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of thing a computation runs against.
///
/// The resolver and scheduler never inspect concrete instrument types;
/// a target is fully described by its type tag and unique identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ComputationTargetType {
    /// A whole portfolio node (aggregation root).
    Portfolio,
    /// A position in a portfolio.
    Position,
    /// A single trade within a position.
    Trade,
    /// A security referenced by positions.
    Security,
    /// A primitive market construct (curve, rate, surface, ...).
    Primitive,
}

impl fmt::Display for ComputationTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComputationTargetType::Portfolio => "PORTFOLIO",
            ComputationTargetType::Position => "POSITION",
            ComputationTargetType::Trade => "TRADE",
            ComputationTargetType::Security => "SECURITY",
            ComputationTargetType::Primitive => "PRIMITIVE",
        };
        write!(f, "{}", s)
    }
}

/// Unique identifier for a computation target.
///
/// Convention: `scheme~value` (e.g. `"DbPos~1234"`, `"Curve~USD-OIS"`),
/// mirroring how upstream position and security masters key their records.
///
/// # Examples
///
/// ```
/// use depgraph_engine::core::target::UniqueId;
///
/// let a = UniqueId::new("DbPos~1234");
/// let b = UniqueId::new("DbPos~5678");
/// assert_ne!(a, b);
/// assert_eq!(a.scheme(), Some("DbPos"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme part of a `scheme~value` identifier, if present.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once('~').map(|(scheme, _)| scheme)
    }

    /// The value part of a `scheme~value` identifier, if present.
    pub fn value(&self) -> Option<&str> {
        self.0.split_once('~').map(|(_, value)| value)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UniqueId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UniqueId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A typed reference to the subject of a computation.
///
/// Immutable; created once per target universe resolution and shared
/// by requirement, specification and node types thereafter.
///
/// # Examples
///
/// ```
/// use depgraph_engine::core::target::ComputationTargetSpec;
///
/// let position = ComputationTargetSpec::position("DbPos~1234");
/// let curve = position.primitive_counterpart();
/// assert_ne!(position, curve);
/// assert_eq!(position.id(), curve.id());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTargetSpec {
    target_type: ComputationTargetType,
    id: UniqueId,
}

impl ComputationTargetSpec {
    pub fn new(target_type: ComputationTargetType, id: impl Into<UniqueId>) -> Self {
        Self {
            target_type,
            id: id.into(),
        }
    }

    pub fn portfolio(id: impl Into<UniqueId>) -> Self {
        Self::new(ComputationTargetType::Portfolio, id)
    }

    pub fn position(id: impl Into<UniqueId>) -> Self {
        Self::new(ComputationTargetType::Position, id)
    }

    pub fn trade(id: impl Into<UniqueId>) -> Self {
        Self::new(ComputationTargetType::Trade, id)
    }

    pub fn security(id: impl Into<UniqueId>) -> Self {
        Self::new(ComputationTargetType::Security, id)
    }

    pub fn primitive(id: impl Into<UniqueId>) -> Self {
        Self::new(ComputationTargetType::Primitive, id)
    }

    pub fn target_type(&self) -> ComputationTargetType {
        self.target_type
    }

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    /// The primitive-typed target with the same identifier.
    ///
    /// Used by input rules that request market constructs (curves, rates)
    /// keyed by the same identifier as a position or security.
    pub fn primitive_counterpart(&self) -> Self {
        Self {
            target_type: ComputationTargetType::Primitive,
            id: self.id.clone(),
        }
    }
}

impl From<UniqueId> for ComputationTargetSpec {
    fn from(id: UniqueId) -> Self {
        Self::new(ComputationTargetType::Primitive, id)
    }
}

impl fmt::Display for ComputationTargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.target_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_parts() {
        let id = UniqueId::new("Curve~USD-OIS");
        assert_eq!(id.scheme(), Some("Curve"));
        assert_eq!(id.value(), Some("USD-OIS"));

        let flat = UniqueId::new("USD");
        assert_eq!(flat.scheme(), None);
    }

    #[test]
    fn test_target_equality() {
        let a = ComputationTargetSpec::position("DbPos~1");
        let b = ComputationTargetSpec::position("DbPos~1");
        let c = ComputationTargetSpec::security("DbPos~1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_id_from_owned_string() {
        let slot = 3;
        let built = ComputationTargetSpec::position(format!("DbPos~{}", slot));
        assert_eq!(built, ComputationTargetSpec::position("DbPos~3"));
    }

    #[test]
    fn test_primitive_counterpart() {
        let pos = ComputationTargetSpec::position("DbPos~42");
        let prim = pos.primitive_counterpart();
        assert_eq!(prim.target_type(), ComputationTargetType::Primitive);
        assert_eq!(prim.id().as_str(), "DbPos~42");
    }

    #[test]
    fn test_target_display() {
        let t = ComputationTargetSpec::position("DbPos~7");
        assert_eq!(format!("{}", t), "POSITION~DbPos~7");
    }
}
