//! Row cell values as decoded from the binlog stream.
//!
//! MySQL rows reach the pipeline as ordered lists of loosely typed cells.
//! [`Value`] is the common currency between the binlog reader, the rule
//! catalog and the destination encoder: attributes fetch a `Value` out of a
//! row image, optionally coerce it, and the query encoder passes it through
//! to the wire untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rule::FetchError;

/// A single cell of a replicated row.
///
/// Integer columns of any width arrive as [`Value::Int`] or [`Value::Uint`]
/// depending on how the reader decoded them; the unsigned coercion in
/// [`to_uint64`] accepts both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Signed integer of any source width, sign-extended to 64 bits.
    Int(i64),
    /// Unsigned integer of any source width, zero-extended to 64 bits.
    Uint(u64),
    /// FLOAT or DOUBLE column.
    Float(f64),
    /// Textual column (CHAR, VARCHAR, TEXT, ENUM/SET names, DECIMAL, JSON).
    Str(String),
    /// Binary column (BINARY, VARBINARY, BLOB, BIT, POINT).
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for SQL NULL.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short tag used in error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Reinterprets an integer value as `u64` via two's-complement widening.
///
/// Signed inputs keep their bit pattern (`-1` becomes `u64::MAX`), matching
/// how the destination stores unsigned fields. Any non-integer input fails;
/// callers decide whether that failure is fatal.
///
/// # Errors
///
/// Returns [`FetchError::Coercion`] when the value is not an integer.
pub fn to_uint64(value: &Value) -> Result<u64, FetchError> {
    match value {
        Value::Int(v) => Ok(*v as u64),
        Value::Uint(v) => Ok(*v),
        other => Err(FetchError::Coercion {
            kind: other.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_uint64_widens_signed() {
        assert_eq!(to_uint64(&Value::Int(10)).unwrap(), 10);
        assert_eq!(to_uint64(&Value::Int(-1)).unwrap(), u64::MAX);
        assert_eq!(to_uint64(&Value::Int(i64::MIN)).unwrap(), 1 << 63);
    }

    #[test]
    fn to_uint64_passes_unsigned_through() {
        assert_eq!(to_uint64(&Value::Uint(10)).unwrap(), 10);
        assert_eq!(to_uint64(&Value::Uint(u64::MAX)).unwrap(), u64::MAX);
    }

    #[test]
    fn to_uint64_rejects_non_integers() {
        for value in [
            Value::Str("10".to_owned()),
            Value::Float(4654.123),
            Value::Bytes(vec![1, 2]),
            Value::Null,
        ] {
            assert!(to_uint64(&value).is_err(), "expected error for {value:?}");
        }
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::Bytes(vec![0; 4]).to_string(), "<4 bytes>");
    }
}
