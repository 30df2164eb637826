//! Scalar values and primary keys for flat tabular input.
//!
//! Columns in a join result carry strings, numbers, booleans, or nulls. This
//! module provides the scalar sum type used for both column values and
//! primary/foreign key components, with structural equality and hashing so
//! composite keys with mixed scalar types can be used as map keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

/// Mapping from column/field name to scalar value, in declaration order.
pub type FieldMap = IndexMap<String, Value>;

/// A scalar value from a flat input row.
///
/// Equality is strict across variants: `Int(1)` and `Float(1.0)` are not
/// equal. Floats compare and hash by bit pattern so `Value` satisfies
/// `Eq + Hash` and can participate in composite map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Value {
    /// Check whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a `serde_json::Value` scalar into a `Value`.
    ///
    /// Integral numbers map to `Int`, other numbers to `Float`. Arrays and
    /// objects are not scalars and map to `Null`.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::Bool(b) => Value::Bool(*b),
            _ => Value::Null,
        }
    }

    /// Convert this value to a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bitwise comparison keeps Eq/Hash consistent (NaN == NaN,
            // 0.0 != -0.0).
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A composite primary (or foreign) key: one scalar per key column, in
/// declared column order.
///
/// Two keys are equal only if every component is equal, including variant.
/// A `PrimaryKey` never contains `Null`: rows with a null key component are
/// excluded from grouping before any key is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    /// Create a key from its components.
    pub fn new(components: Vec<Value>) -> Self {
        PrimaryKey(components)
    }

    /// Key components in declared column order.
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    /// Number of key columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", component)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for PrimaryKey {
    fn from(components: Vec<Value>) -> Self {
        PrimaryKey::new(components)
    }
}
