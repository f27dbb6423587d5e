//! Dynamically typed values held by in-memory items and attribute maps

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{arr0, ArrayD};

use crate::array::{shape_summary, ArrayValue};

/// A scalar, an array or a nested container
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Array(ArrayValue),
    Sequence(Vec<Value>),
    /// Keys are kept sorted, which fixes the child order of mapping items
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    /// Element type name as shown in the tree
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int64",
            Value::UInt(_) => "uint64",
            Value::Float(_) => "float64",
            Value::Str(_) => "str",
            Value::Array(array) => array.element_type_name(),
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Sequence(_) | Value::Mapping(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Array(array) => array.scalar_value().and_then(|v| v.as_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A zero-dimensional array holding a scalar value
    pub fn to_array(&self) -> Option<ArrayValue> {
        let array = match self {
            Value::Bool(v) => ArrayValue::Bool(arr0(*v).into_dyn()),
            Value::Int(v) => ArrayValue::I64(arr0(*v).into_dyn()),
            Value::UInt(v) => ArrayValue::U64(arr0(*v).into_dyn()),
            Value::Float(v) => ArrayValue::F64(arr0(*v).into_dyn()),
            Value::Str(v) => ArrayValue::Str(arr0(v.clone()).into_dyn()),
            Value::Null => ArrayValue::Str(arr0(String::from("null")).into_dyn()),
            Value::Array(array) => array.clone(),
            Value::Sequence(_) | Value::Mapping(_) => return None,
        };
        Some(array)
    }

    /// Collapse a sequence of numbers into a 1D array, the way a plain list of
    /// numbers reads as a vector. Mixed or nested sequences are left alone.
    pub fn into_homogeneous_array(self) -> Value {
        let Value::Sequence(items) = self else {
            return self;
        };
        if items.is_empty() {
            return Value::Sequence(items);
        }
        if items.iter().all(|item| matches!(item, Value::Int(_))) {
            let values: Vec<i64> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Int(v) => Some(*v),
                    _ => None,
                })
                .collect();
            return Value::Array(ArrayD::from_shape_vec(vec![values.len()], values)
                .map(ArrayValue::I64)
                .unwrap_or_else(|_| ArrayValue::I64(ArrayD::zeros(vec![0]))));
        }
        if items
            .iter()
            .all(|item| matches!(item, Value::Int(_) | Value::Float(_)))
        {
            let values: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            return Value::Array(ArrayD::from_shape_vec(vec![values.len()], values)
                .map(ArrayValue::F64)
                .unwrap_or_else(|_| ArrayValue::F64(ArrayD::zeros(vec![0]))));
        }
        Value::Sequence(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Array(array) if array.ndim() == 0 => write!(f, "{array}"),
            Value::Array(array) => write!(f, "{} array of {}", array.element_type_name(), shape_summary(array.shape())),
            Value::Sequence(items) => write!(f, "sequence of {} items", items.len()),
            Value::Mapping(map) => write!(f, "mapping of {} items", map.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ArrayValue> for Value {
    fn from(v: ArrayValue) -> Self {
        Value::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_to_array() {
        let array = Value::Int(7).to_array().unwrap();
        assert_eq!(array.shape(), &[] as &[usize]);
        assert_eq!(array.scalar_value(), Some(Value::Int(7)));
        assert!(Value::Sequence(vec![]).to_array().is_none());
    }

    #[test]
    fn test_homogeneous_sequences_become_arrays() {
        let ints = Value::Sequence(vec![Value::Int(1), Value::Int(2)]).into_homogeneous_array();
        assert!(matches!(ints, Value::Array(ArrayValue::I64(_))));

        let floats = Value::Sequence(vec![Value::Int(1), Value::Float(2.5)]).into_homogeneous_array();
        assert!(matches!(floats, Value::Array(ArrayValue::F64(_))));

        let mixed = Value::Sequence(vec![Value::Int(1), Value::from("a")]).into_homogeneous_array();
        assert!(matches!(mixed, Value::Sequence(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Null);
        assert_eq!(Value::Mapping(map).to_string(), "mapping of 1 items");
    }
}
