//! Typed column values and per-dtype coercion

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::schema::Dtype;

/// A single cell of a candidate or accepted row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Absent,
    Text(String),
    Integer(i64),
    Real(f64),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Key used for primary-key deduplication, `None` when absent
    pub fn key(&self) -> Option<PrimaryKey> {
        match self {
            Value::Absent => None,
            Value::Text(s) => Some(PrimaryKey::Text(s.clone())),
            Value::Integer(i) => Some(PrimaryKey::Integer(*i)),
            // -0.0 and 0.0 compare equal, so they must share a key
            Value::Real(r) => Some(PrimaryKey::Real(if *r == 0.0 { 0 } else { r.to_bits() })),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => write!(f, "NULL"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Absent => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(r) => serializer.serialize_f64(*r),
        }
    }
}

/// Hashable form of a primary-key value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    Text(String),
    Integer(i64),
    /// Bit pattern of the f64
    Real(u64),
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Text(s) => write!(f, "'{}'", s),
            PrimaryKey::Integer(i) => write!(f, "{}", i),
            PrimaryKey::Real(bits) => write!(f, "{}", f64::from_bits(*bits)),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot read '{raw}' as {dtype}")]
pub struct CoercionError {
    pub raw: String,
    pub dtype: Dtype,
}

impl Dtype {
    /// Convert a raw tag value into this type
    ///
    /// Text is kept verbatim; numbers tolerate surrounding whitespace. NaN is
    /// refused since SQLite stores it as NULL.
    pub fn coerce(self, raw: &str) -> Result<Value, CoercionError> {
        let fail = || CoercionError {
            raw: raw.to_string(),
            dtype: self,
        };

        match self {
            Dtype::Text => Ok(Value::Text(raw.to_string())),
            Dtype::Integer => raw.trim().parse::<i64>().map(Value::Integer).map_err(|_| fail()),
            Dtype::Real => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .map(Value::Real)
                .ok_or_else(fail),
        }
    }
}
