use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Constraint on a single value property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyConstraint {
    /// Any value is acceptable; the resolver pins a concrete value later.
    Any,
    /// One of a fixed set of acceptable values.
    OneOf(BTreeSet<String>),
}

impl PropertyConstraint {
    pub fn one_of(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        PropertyConstraint::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn single(value: impl Into<String>) -> Self {
        PropertyConstraint::OneOf(BTreeSet::from([value.into()]))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PropertyConstraint::Any)
    }

    /// Intersection of two constraints. `None` when they are incompatible.
    pub fn intersect(&self, other: &PropertyConstraint) -> Option<PropertyConstraint> {
        match (self, other) {
            (PropertyConstraint::Any, c) | (c, PropertyConstraint::Any) => Some(c.clone()),
            (PropertyConstraint::OneOf(a), PropertyConstraint::OneOf(b)) => {
                let common: BTreeSet<String> = a.intersection(b).cloned().collect();
                if common.is_empty() {
                    None
                } else {
                    Some(PropertyConstraint::OneOf(common))
                }
            }
        }
    }
}

impl fmt::Display for PropertyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyConstraint::Any => write!(f, "*"),
            PropertyConstraint::OneOf(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                write!(f, "[{}]", joined.join(","))
            }
        }
    }
}

/// An ordered set of property constraints qualifying a value identity.
///
/// A property may be constrained to a fixed set of values (`OneOf`),
/// left as a wildcard (`Any`), or omitted entirely (absent from the map).
/// Backed by a `BTreeMap` so iteration, hashing and ordering are
/// deterministic; resolution reproducibility depends on this.
///
/// # Examples
///
/// ```
/// use depgraph_engine::core::properties::ValueProperties;
///
/// let constraints = ValueProperties::none()
///     .with("Currency", ["USD"])
///     .with_any("CurveName");
/// assert_eq!(constraints.len(), 2);
/// assert_eq!(constraints.wildcard_count(), 1);
/// ```
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ValueProperties {
    entries: BTreeMap<String, PropertyConstraint>,
}

impl ValueProperties {
    /// The empty property set (no constraints).
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a fixed-set constraint on a property.
    pub fn with(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.entries
            .insert(name.into(), PropertyConstraint::one_of(values));
        self
    }

    /// Add a single-value constraint on a property.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries
            .insert(name.into(), PropertyConstraint::single(value));
        self
    }

    /// Add a wildcard constraint on a property.
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.entries.insert(name.into(), PropertyConstraint::Any);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, constraint: PropertyConstraint) {
        self.entries.insert(name.into(), constraint);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyConstraint> {
        self.entries.get(name)
    }

    /// The single pinned value of a property, if it is constrained to
    /// exactly one value.
    pub fn pinned_value(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(PropertyConstraint::OneOf(values)) if values.len() == 1 => {
                values.iter().next().map(String::as_str)
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyConstraint)> {
        self.entries.iter()
    }

    /// Number of non-wildcard entries. Candidates with higher specificity
    /// are preferred during resolution.
    pub fn specificity(&self) -> usize {
        self.entries
            .values()
            .filter(|c| !c.is_wildcard())
            .count()
    }

    /// Number of wildcard entries.
    pub fn wildcard_count(&self) -> usize {
        self.entries.values().filter(|c| c.is_wildcard()).count()
    }

    /// Intersect this property set with a set of requirement constraints.
    ///
    /// Properties present on only one side are carried over unchanged;
    /// properties present on both sides must have a non-empty constraint
    /// intersection, otherwise the whole intersection is `None`.
    pub fn intersect(&self, constraints: &ValueProperties) -> Option<ValueProperties> {
        let mut merged = self.entries.clone();
        for (name, constraint) in &constraints.entries {
            match merged.get(name) {
                Some(existing) => {
                    let narrowed = existing.intersect(constraint)?;
                    merged.insert(name.clone(), narrowed);
                }
                None => {
                    merged.insert(name.clone(), constraint.clone());
                }
            }
        }
        Some(ValueProperties { entries: merged })
    }

    /// Whether this (specification-side) property set satisfies a set of
    /// requirement constraints.
    ///
    /// A wildcard on either side satisfies the other; a fixed-set
    /// constraint requires the property to be present with at least one
    /// value in common. Omitted constraints impose nothing.
    pub fn satisfies(&self, constraints: &ValueProperties) -> bool {
        constraints.entries.iter().all(|(name, constraint)| {
            match (self.entries.get(name), constraint) {
                (None, _) => false,
                (Some(_), PropertyConstraint::Any) => true,
                (Some(held), required) => held.intersect(required).is_some(),
            }
        })
    }
}

impl fmt::Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, constraint)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, constraint)?;
        }
        write!(f, "}}")
    }
}
