//! Scalar values bound into statements and read back out of rows.
//!
//! On the wire every value is plain JSON: `null`, an integer number, a
//! non-integer number, a string, or an array of bytes for blobs. Integers and
//! reals are kept apart all the way down to the engine's bind calls.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Decode a wire parameter.
    ///
    /// Booleans, objects and arrays that are not byte sequences have no SQL
    /// binding and fail with [`StoreError::Binding`].
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::Null),
            JsonValue::String(s) => Ok(Self::Text(s.clone())),
            JsonValue::Number(n) => number_to_value(n),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| {
                            StoreError::Binding(format!(
                                "unsupported parameter type: array element {item} is not a byte"
                            ))
                        })
                })
                .collect::<Result<Vec<u8>>>()
                .map(Self::Blob),
            JsonValue::Bool(_) => {
                Err(StoreError::Binding("unsupported parameter type: boolean".to_owned()))
            },
            JsonValue::Object(_) => {
                Err(StoreError::Binding("unsupported parameter type: object".to_owned()))
            },
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Integer(i) => JsonValue::Number(Number::from(*i)),
            // NaN and infinities have no JSON form; SQLite stores NaN as NULL anyway.
            Self::Real(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Blob(bytes) => {
                JsonValue::Array(bytes.iter().map(|b| JsonValue::Number(Number::from(*b))).collect())
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }
}

fn number_to_value(n: &Number) -> Result<SqlValue> {
    if let Some(i) = n.as_i64() {
        return Ok(SqlValue::Integer(i));
    }
    if n.is_u64() {
        return Err(StoreError::Binding(format!("integer parameter {n} exceeds 64-bit signed range")));
    }
    n.as_f64()
        .map(SqlValue::Real)
        .ok_or_else(|| StoreError::Binding(format!("unrepresentable number {n}")))
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Decode a row read back from the wire. Arrays are blobs here.
pub fn row_from_json(value: &JsonValue) -> Result<Vec<SqlValue>> {
    match value {
        JsonValue::Array(cells) => cells
            .iter()
            .map(|cell| match cell {
                JsonValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
                other => SqlValue::from_json(other),
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| StoreError::Protocol(format!("malformed row value: {e}"))),
        other => Err(StoreError::Protocol(format!("expected a row array, got {other}"))),
    }
}

pub fn row_to_json(row: &[SqlValue]) -> JsonValue {
    JsonValue::Array(row.iter().map(SqlValue::to_json).collect())
}
