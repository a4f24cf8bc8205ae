use serde::{Deserialize, Serialize};
use std::fmt;

/// A value produced by a compute function or market-data provider.
///
/// Opaque to the engine: the resolver and scheduler move these around
/// without interpreting them. The closed set of shapes covers what the
/// surrounding pricing layer exchanges (scalars, curves/series, labels,
/// flags).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComputedValue {
    Scalar(f64),
    Series(Vec<f64>),
    Text(String),
    Flag(bool),
}

impl ComputedValue {
    /// Number of data items, used by the cost model to track data volume.
    pub fn item_count(&self) -> usize {
        match self {
            ComputedValue::Series(values) => values.len(),
            _ => 1,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ComputedValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            ComputedValue::Series(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ComputedValue {
    fn from(v: f64) -> Self {
        ComputedValue::Scalar(v)
    }
}

impl From<Vec<f64>> for ComputedValue {
    fn from(v: Vec<f64>) -> Self {
        ComputedValue::Series(v)
    }
}

impl fmt::Display for ComputedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputedValue::Scalar(v) => write!(f, "{}", v),
            ComputedValue::Series(v) => write!(f, "series[{}]", v.len()),
            ComputedValue::Text(s) => write!(f, "{}", s),
            ComputedValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_count() {
        assert_eq!(ComputedValue::Scalar(1.0).item_count(), 1);
        assert_eq!(ComputedValue::Series(vec![1.0, 2.0, 3.0]).item_count(), 3);
        assert_eq!(ComputedValue::Text("x".into()).item_count(), 1);
    }

    #[test]
    fn test_conversions() {
        let v: ComputedValue = 2.5.into();
        assert_eq!(v.as_scalar(), Some(2.5));
        let s: ComputedValue = vec![1.0, 2.0].into();
        assert_eq!(s.as_series(), Some(&[1.0, 2.0][..]));
        assert_eq!(s.as_scalar(), None);
    }
}
