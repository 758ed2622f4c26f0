//! Value types for phasekv
//!
//! This module defines the value model held by key records.
//!
//! ## Absent Keys
//!
//! A key that has never been written has no value. The update operations
//! treat absence as the identity of the operation: `0` for increments and
//! maxima, the empty list for appends. A plain read of an absent key
//! observes `None`.
//!
//! ## Equality Rules
//!
//! - Different types are never equal (no type coercion)
//! - `Int(0)` != `Null`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical value type
///
/// ## The Four Types
///
/// 1. `Null` - explicit empty value
/// 2. `Int` - 64-bit signed integer (counters, stock levels, bids)
/// 3. `Str` - UTF-8 string
/// 4. `List` - ordered sequence of values (append-only logs)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit empty value
    Null,

    /// 64-bit signed integer
    Int(i64),

    /// UTF-8 encoded string
    Str(String),

    /// Ordered sequence of values
    List(Vec<Value>),
}

/// Type discriminant of a [`Value`], used in abort reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// [`Value::Null`]
    Null,
    /// [`Value::Int`]
    Int,
    /// [`Value::Str`]
    Str,
    /// [`Value::List`]
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "Null",
            ValueKind::Int => "Int",
            ValueKind::Str => "Str",
            ValueKind::List => "List",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Returns the type discriminant
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Int(_) => ValueKind::Int,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
        }
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as list slice
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Integer view of an optional value, treating absence as zero
    ///
    /// Returns `Err(kind)` with the offending kind when the value exists but
    /// is not an integer.
    pub fn int_or_zero(value: Option<&Value>) -> Result<i64, ValueKind> {
        match value {
            None => Ok(0),
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => Err(other.kind()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}
