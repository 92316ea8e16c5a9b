//! Structured key tuples for matching related records.
//!
//! Preload and association code group records by the values of their key
//! columns. Keys are compared as normalized tuples rather than joined strings,
//! so `("a,b",)` and `("a", "b")` never collide, and an `INTEGER` read back
//! from the driver as `i64` still matches an `i32` field value.

use chrono::NaiveDateTime;

use crate::value::Value;

/// One normalized component of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Json(String),
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Bool(*b),
            Value::TinyInt(i) => KeyPart::Int(i64::from(*i)),
            Value::SmallInt(i) => KeyPart::Int(i64::from(*i)),
            Value::Int(i) => KeyPart::Int(i64::from(*i)),
            Value::BigInt(i) => KeyPart::Int(*i),
            Value::Float(f) => KeyPart::Float(f64::from(*f).to_bits()),
            Value::Double(f) => KeyPart::Float(f.to_bits()),
            Value::Decimal(s) | Value::Text(s) => KeyPart::Text(s.clone()),
            Value::Bytes(b) => KeyPart::Bytes(b.clone()),
            Value::Timestamp(t) => KeyPart::Timestamp(*t),
            Value::Json(j) => KeyPart::Json(j.to_string()),
        }
    }
}

/// A tuple of normalized key values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyTuple(Vec<KeyPart>);

impl KeyTuple {
    pub fn from_values(values: &[Value]) -> Self {
        Self(values.iter().map(KeyPart::from).collect())
    }

    /// True when every component is NULL; such keys never match anything.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|p| *p == KeyPart::Null)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}
