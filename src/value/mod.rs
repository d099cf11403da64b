//! Dynamic, nullable cell values.
//!
//! Every cell stored in a group table, every key tuple handed to the
//! searcher and every field produced by a join is a [`Value`].  The
//! ordering rules here are the single source of truth for key order:
//!
//! - `Null` sorts before every other value.
//! - `Int`, `Long` and `Double` compare numerically with each other.
//! - `Bool`, `Date` and `String` compare only against their own kind.
//!
//! Comparing two values of unrelated kinds is an evaluation error
//! ([`ValueError::Incomparable`]) that aborts the enclosing search or join.

mod encoding_impls;


use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Evaluation errors raised while comparing or combining values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// Two values of unrelated kinds were compared.
    #[error("cannot compare {left} with {right}")]
    Incomparable {
        /// Kind of the left operand.
        left: ValueKind,
        /// Kind of the right operand.
        right: ValueKind,
    },

    /// An arithmetic operator received operands it cannot combine.
    #[error("illegal operands for '{op}': {left} and {right}")]
    IllegalOperands {
        /// Operator symbol.
        op: &'static str,
        /// Kind of the left operand.
        left: ValueKind,
        /// Kind of the right operand.
        right: ValueKind,
    },
}

// ------------------------------------------------------------------------------------------------
// Value kinds
// ------------------------------------------------------------------------------------------------

/// The kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Long,
    Double,
    Date,
    String,
}

impl ValueKind {
    /// `true` for `Int`, `Long` and `Double`.
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Long | ValueKind::Double)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::Date => "date",
            ValueKind::String => "string",
        };
        f.write_str(name)
    }
}

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A single nullable cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    String(String),
}

impl Value {
    /// Returns the kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Double(_) => ValueKind::Double,
            Value::Date(_) => ValueKind::Date,
            Value::String(_) => ValueKind::String,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by the `OR` relation: null and `false` are false,
    /// everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    /// Integral view of `Int` and `Long` values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "date({v})"),
            Value::String(v) => write!(f, "{v:?}"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Ordering
// ------------------------------------------------------------------------------------------------

/// Compares two values under the key ordering.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, ValueError> {
    use Value::*;
    let ord = match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Int(x), Int(y)) => x.cmp(y),
        (Long(x), Long(y)) => x.cmp(y),
        (Int(x), Long(y)) => i64::from(*x).cmp(y),
        (Long(x), Int(y)) => x.cmp(&i64::from(*y)),
        (Double(x), Double(y)) => x.total_cmp(y),
        (Double(_), Int(_) | Long(_)) | (Int(_) | Long(_), Double(_)) => {
            let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            x.total_cmp(&y)
        }
        (Date(x), Date(y)) => x.cmp(y),
        (String(x), String(y)) => x.cmp(y),
        (Bool(x), Bool(y)) => x.cmp(y),
        _ => {
            return Err(ValueError::Incomparable {
                left: a.kind(),
                right: b.kind(),
            });
        }
    };
    Ok(ord)
}

/// Lexicographic comparison of the first `n` entries of two tuples.
///
/// Both tuples must hold at least `n` values.
pub fn compare_tuples(a: &[Value], b: &[Value], n: usize) -> Result<Ordering, ValueError> {
    for (x, y) in a.iter().zip(b.iter()).take(n) {
        let ord = compare(x, y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

/// Equality under the key ordering (`Int(1) == Long(1)`).
pub fn is_equal(a: &Value, b: &Value) -> Result<bool, ValueError> {
    Ok(compare(a, b)? == Ordering::Equal)
}

// ------------------------------------------------------------------------------------------------
// Arithmetic
// ------------------------------------------------------------------------------------------------

/// Numeric addition as used by sum and average aggregates.
///
/// Null is the identity.  `Int + Int` widens to `Long` on overflow, a
/// `Long` overflow falls back to `Double`, and any `Double` operand
/// produces a `Double`.
pub fn add(a: &Value, b: &Value) -> Result<Value, ValueError> {
    use Value::*;
    match (a, b) {
        (Null, other) | (other, Null) if other.is_null() || other.kind().is_numeric() => {
            Ok(other.clone())
        }
        (Int(x), Int(y)) => Ok(x
            .checked_add(*y)
            .map_or_else(|| Long(i64::from(*x) + i64::from(*y)), Int)),
        (Int(_) | Long(_), Int(_) | Long(_)) => {
            let (x, y) = (a.as_i64().unwrap_or_default(), b.as_i64().unwrap_or_default());
            Ok(x.checked_add(y)
                .map_or_else(|| Double(x as f64 + y as f64), Long))
        }
        (Double(_) | Int(_) | Long(_), Double(_) | Int(_) | Long(_)) => Ok(Double(
            a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default(),
        )),
        _ => Err(ValueError::IllegalOperands {
            op: "+",
            left: a.kind(),
            right: b.kind(),
        }),
    }
}
