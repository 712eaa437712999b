//! Raw telemetry sample types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Quality flag attached to every telemetry sample by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStatus {
    Nominal,
    Warn,
    Error,
    Failure,
    Unknown,
}

/// One heterogeneous telemetry value.
///
/// Sensors report numbers, strings or booleans; format drivers also pin
/// opaque objects (antenna descriptions, subarray handles) into the
/// cache. A closed variant keeps the cache and the categorical machinery
/// monomorphic.
#[derive(Clone)]
pub enum SensorValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl SensorValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Float(v) => Some(*v),
            SensorValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SensorValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Equality with a tolerance on numeric values. Non-numeric values
    /// compare exactly; opaque values compare by identity.
    pub fn same_within(&self, other: &SensorValue, tolerance: f64) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() <= tolerance,
            _ => self == other,
        }
    }
}

impl PartialEq for SensorValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SensorValue::Float(a), SensorValue::Float(b)) => a == b,
            (SensorValue::Int(a), SensorValue::Int(b)) => a == b,
            (SensorValue::Float(a), SensorValue::Int(b))
            | (SensorValue::Int(b), SensorValue::Float(a)) => *a == *b as f64,
            (SensorValue::Str(a), SensorValue::Str(b)) => a == b,
            (SensorValue::Bool(a), SensorValue::Bool(b)) => a == b,
            (SensorValue::Opaque(a), SensorValue::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Float(v) => write!(f, "Float({v})"),
            SensorValue::Int(v) => write!(f, "Int({v})"),
            SensorValue::Str(s) => write!(f, "Str({s:?})"),
            SensorValue::Bool(b) => write!(f, "Bool({b})"),
            SensorValue::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl From<f64> for SensorValue {
    fn from(v: f64) -> Self {
        SensorValue::Float(v)
    }
}

impl From<i64> for SensorValue {
    fn from(v: i64) -> Self {
        SensorValue::Int(v)
    }
}

impl From<&str> for SensorValue {
    fn from(v: &str) -> Self {
        SensorValue::Str(v.to_string())
    }
}

impl From<String> for SensorValue {
    fn from(v: String) -> Self {
        SensorValue::Str(v)
    }
}

impl From<bool> for SensorValue {
    fn from(v: bool) -> Self {
        SensorValue::Bool(v)
    }
}

/// One record of a raw sensor stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    /// UTC seconds.
    pub timestamp: f64,
    pub value: SensorValue,
    pub status: SampleStatus,
}

impl SensorSample {
    pub fn new(timestamp: f64, value: impl Into<SensorValue>, status: SampleStatus) -> Self {
        Self {
            timestamp,
            value: value.into(),
            status,
        }
    }

    /// A nominal-status sample; most synthetic streams need nothing else.
    pub fn nominal(timestamp: f64, value: impl Into<SensorValue>) -> Self {
        Self::new(timestamp, value, SampleStatus::Nominal)
    }
}

/// Read-only view of one named sensor's sample stream, sorted by
/// timestamp. The stream is shared with the format driver that produced
/// it and is never mutated here.
#[derive(Debug, Clone)]
pub struct SensorData {
    name: String,
    samples: Arc<[SensorSample]>,
}

impl SensorData {
    pub fn new(name: impl Into<String>, samples: Vec<SensorSample>) -> Self {
        Self {
            name: name.into(),
            samples: samples.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> &[SensorSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_compare_across_variants() {
        assert_eq!(SensorValue::Float(3.0), SensorValue::Int(3));
        assert_ne!(SensorValue::Float(3.0), SensorValue::Str("3".to_string()));
    }

    #[test]
    fn tolerance_comparison_only_applies_to_numbers() {
        assert!(SensorValue::Float(1.0).same_within(&SensorValue::Float(1.0005), 1e-3));
        assert!(!SensorValue::Float(1.0).same_within(&SensorValue::Float(1.1), 1e-3));
        assert!(SensorValue::from("x").same_within(&SensorValue::from("x"), 1e9));
    }

    #[test]
    fn opaque_values_compare_by_identity() {
        let a: Arc<dyn Any + Send + Sync> = Arc::new(42u32);
        let b: Arc<dyn Any + Send + Sync> = Arc::new(42u32);
        assert_eq!(
            SensorValue::Opaque(a.clone()),
            SensorValue::Opaque(a.clone())
        );
        assert_ne!(SensorValue::Opaque(a), SensorValue::Opaque(b));
    }
}
