//! Typed, null-aware column vectors.
//!
//! A [`Vector`] is the batch payload read from one column segment.  Values
//! are stored once per kind (`Vec<i32>`, `Vec<String>`, …) with an
//! optional null-sign array, and addressed **1-based**: slot 0 is reserved
//! so that row numbers inside a segment map directly to vector indices.
//!
//! Predicates are evaluated batch-at-a-time.  A relation against a
//! constant, another vector or null produces a [`BoolVector`], and
//! further relations are fused into that accumulator with AND/OR.  Under
//! AND only slots that are still `true` are evaluated, under OR only the
//! slots that are still `false`.
//!
//! # Null ordering
//!
//! Null is the smallest value, so against null:
//!
//! | relation | result per slot     |
//! |----------|---------------------|
//! | `=`      | slot is null        |
//! | `>`      | slot is not null    |
//! | `>=`     | always true         |
//! | `<`      | always false        |
//! | `<=`     | slot is null        |
//! | `<>`     | slot is not null    |
//! | `OR`     | slot is truthy      |


use std::cmp::Ordering;

use crate::value::{self, Value, ValueError, ValueKind};

// ------------------------------------------------------------------------------------------------
// Relations
// ------------------------------------------------------------------------------------------------

/// A binary relation evaluated slot by slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    NotEqual,
    /// Logical OR of the operands' truthiness.
    Or,
}

impl Relation {
    /// Whether an ordering between left and right operand satisfies the
    /// relation.  `Or` never consults an ordering and returns `false`.
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            Relation::Equal => ord == Ordering::Equal,
            Relation::Greater => ord == Ordering::Greater,
            Relation::GreaterEqual => ord != Ordering::Less,
            Relation::Less => ord == Ordering::Less,
            Relation::LessEqual => ord != Ordering::Greater,
            Relation::NotEqual => ord != Ordering::Equal,
            Relation::Or => false,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Equal => "==",
            Relation::Greater => ">",
            Relation::GreaterEqual => ">=",
            Relation::Less => "<",
            Relation::LessEqual => "<=",
            Relation::NotEqual => "!=",
            Relation::Or => "||",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// BoolVector
// ------------------------------------------------------------------------------------------------

/// Per-slot boolean result of a relation, 1-based like [`Vector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolVector {
    values: Vec<bool>,
}

impl BoolVector {
    /// A vector of `len` slots, all set to `init`.
    pub fn new(len: usize, init: bool) -> Self {
        let mut values = vec![init; len + 1];
        values[0] = false;
        Self { values }
    }

    /// Builds a vector whose slot `i + 1` is `bools[i]`.
    pub fn from_bools(bools: &[bool]) -> Self {
        let mut values = Vec::with_capacity(bools.len() + 1);
        values.push(false);
        values.extend_from_slice(bools);
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot `i` (1-based).
    pub fn get(&self, i: usize) -> bool {
        self.values[i]
    }

    pub fn set(&mut self, i: usize, v: bool) {
        self.values[i] = v;
    }

    /// Number of `true` slots.
    pub fn true_count(&self) -> usize {
        self.values[1..].iter().filter(|b| **b).count()
    }

    /// 1-based indices of the `true` slots, ascending.
    pub fn true_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.values
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, b)| b.then_some(i))
    }

    /// Slots `1..=len` as a plain slice.
    pub fn as_slice(&self) -> &[bool] {
        &self.values[1..]
    }
}

// ------------------------------------------------------------------------------------------------
// Vector
// ------------------------------------------------------------------------------------------------

/// Storage kind of a [`Vector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Int,
    Long,
    Double,
    Date,
    String,
    Bool,
    /// Mixed or unknown kinds, stored as dynamic [`Value`]s.
    Object,
}

/// Typed payload of a [`Vector`].  Index 0 of every array is a filler.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorData {
    Int(Vec<i32>),
    Long(Vec<i64>),
    Double(Vec<f64>),
    Date(Vec<i64>),
    String(Vec<String>),
    Bool(Vec<bool>),
    Object(Vec<Value>),
}

/// A fixed-length, 1-based column vector with optional null signs.
///
/// Typed kinds track nulls in `signs` (`true` = null); the `Object` kind
/// stores [`Value::Null`] directly and never carries signs.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: VectorData,
    signs: Option<Vec<bool>>,
}

impl Vector {
    /// Builds a vector from `values`, choosing the narrowest storage kind.
    ///
    /// If every non-null value has the same kind the vector is typed;
    /// otherwise (mixed kinds, or only nulls) it falls back to `Object`.
    pub fn from_values(values: &[Value]) -> Self {
        let mut kind: Option<ValueKind> = None;
        let mut mixed = false;
        let mut has_null = false;
        for v in values {
            match (v.kind(), kind) {
                (ValueKind::Null, _) => has_null = true,
                (k, None) => kind = Some(k),
                (k, Some(prev)) if k != prev => mixed = true,
                _ => {}
            }
        }

        let object = || {
            let mut all = Vec::with_capacity(values.len() + 1);
            all.push(Value::Null);
            all.extend_from_slice(values);
            Vector {
                data: VectorData::Object(all),
                signs: None,
            }
        };
        let Some(kind) = kind.filter(|_| !mixed) else {
            return object();
        };

        let signs = has_null.then(|| {
            std::iter::once(false)
                .chain(values.iter().map(Value::is_null))
                .collect()
        });

        macro_rules! typed {
            ($variant:ident, $default:expr, $pat:pat => $out:expr) => {{
                let mut arr = Vec::with_capacity(values.len() + 1);
                arr.push($default);
                for v in values {
                    arr.push(match v {
                        $pat => $out,
                        _ => $default,
                    });
                }
                VectorData::$variant(arr)
            }};
        }

        let data = match kind {
            ValueKind::Int => typed!(Int, 0, Value::Int(x) => *x),
            ValueKind::Long => typed!(Long, 0, Value::Long(x) => *x),
            ValueKind::Double => typed!(Double, 0.0, Value::Double(x) => *x),
            ValueKind::Date => typed!(Date, 0, Value::Date(x) => *x),
            ValueKind::Bool => typed!(Bool, false, Value::Bool(x) => *x),
            ValueKind::String => typed!(String, String::new(), Value::String(x) => x.clone()),
            ValueKind::Null => return object(),
        };
        Vector { data, signs }
    }

    pub fn len(&self) -> usize {
        let raw = match &self.data {
            VectorData::Int(v) => v.len(),
            VectorData::Long(v) => v.len(),
            VectorData::Double(v) => v.len(),
            VectorData::Date(v) => v.len(),
            VectorData::String(v) => v.len(),
            VectorData::Bool(v) => v.len(),
            VectorData::Object(v) => v.len(),
        };
        raw.saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> VectorKind {
        match &self.data {
            VectorData::Int(_) => VectorKind::Int,
            VectorData::Long(_) => VectorKind::Long,
            VectorData::Double(_) => VectorKind::Double,
            VectorData::Date(_) => VectorKind::Date,
            VectorData::String(_) => VectorKind::String,
            VectorData::Bool(_) => VectorKind::Bool,
            VectorData::Object(_) => VectorKind::Object,
        }
    }

    pub fn data(&self) -> &VectorData {
        &self.data
    }

    /// Whether slot `i` (1-based) is null.
    pub fn is_null(&self, i: usize) -> bool {
        match (&self.data, &self.signs) {
            (VectorData::Object(v), _) => v[i].is_null(),
            (_, Some(signs)) => signs[i],
            (_, None) => false,
        }
    }

    /// Slot `i` (1-based) as a dynamic value.
    ///
    /// # Panics
    ///
    /// Panics if `i` is 0 or greater than [`len`](Self::len).
    pub fn get(&self, i: usize) -> Value {
        assert!(i >= 1 && i <= self.len(), "vector index {i} out of range");
        if self.is_null(i) {
            return Value::Null;
        }
        match &self.data {
            VectorData::Int(v) => Value::Int(v[i]),
            VectorData::Long(v) => Value::Long(v[i]),
            VectorData::Double(v) => Value::Double(v[i]),
            VectorData::Date(v) => Value::Date(v[i]),
            VectorData::String(v) => Value::String(v[i].clone()),
            VectorData::Bool(v) => Value::Bool(v[i]),
            VectorData::Object(v) => v[i].clone(),
        }
    }

    fn is_truthy(&self, i: usize) -> bool {
        match &self.data {
            VectorData::Bool(v) => !self.is_null(i) && v[i],
            VectorData::Object(v) => v[i].is_truthy(),
            _ => !self.is_null(i),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Relations against null
    // --------------------------------------------------------------------------------------------

    fn holds_against_null(&self, rel: Relation, i: usize) -> bool {
        match rel {
            Relation::Equal | Relation::LessEqual => self.is_null(i),
            Relation::Greater | Relation::NotEqual => !self.is_null(i),
            Relation::GreaterEqual => true,
            Relation::Less => false,
            Relation::Or => self.is_truthy(i),
        }
    }

    /// Evaluates `slot <rel> null` for every slot.
    pub fn compare_to_null(&self, rel: Relation) -> BoolVector {
        let n = self.len();
        let mut out = BoolVector::new(n, false);
        for i in 1..=n {
            out.set(i, self.holds_against_null(rel, i));
        }
        out
    }

    /// Fuses `slot <rel> null` into `acc` with AND (`is_and`) or OR.
    pub fn combine_null(&self, rel: Relation, acc: &mut BoolVector, is_and: bool) {
        for i in 1..=self.len() {
            if acc.get(i) == is_and {
                acc.set(i, self.holds_against_null(rel, i));
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Relations against another vector
    // --------------------------------------------------------------------------------------------

    fn cmp_slots(&self, other: &Vector, i: usize) -> Result<Ordering, ValueError> {
        match (self.is_null(i), other.is_null(i)) {
            (true, true) => return Ok(Ordering::Equal),
            (true, false) => return Ok(Ordering::Less),
            (false, true) => return Ok(Ordering::Greater),
            (false, false) => {}
        }
        match (&self.data, &other.data) {
            (VectorData::Int(a), VectorData::Int(b)) => Ok(a[i].cmp(&b[i])),
            (VectorData::Long(a), VectorData::Long(b)) => Ok(a[i].cmp(&b[i])),
            (VectorData::Date(a), VectorData::Date(b)) => Ok(a[i].cmp(&b[i])),
            (VectorData::Double(a), VectorData::Double(b)) => Ok(a[i].total_cmp(&b[i])),
            (VectorData::String(a), VectorData::String(b)) => Ok(a[i].cmp(&b[i])),
            _ => value::compare(&self.get(i), &other.get(i)),
        }
    }

    fn holds_against(&self, rel: Relation, other: &Vector, i: usize) -> Result<bool, ValueError> {
        if rel == Relation::Or {
            return Ok(self.is_truthy(i) || other.is_truthy(i));
        }
        Ok(rel.holds(self.cmp_slots(other, i)?))
    }

    /// Evaluates `self[i] <rel> other[i]` for every slot.
    ///
    /// Both vectors must have the same length.
    pub fn compare(&self, rel: Relation, other: &Vector) -> Result<BoolVector, ValueError> {
        let n = self.len().min(other.len());
        let mut out = BoolVector::new(n, false);
        for i in 1..=n {
            out.set(i, self.holds_against(rel, other, i)?);
        }
        Ok(out)
    }

    /// Fuses `self[i] <rel> other[i]` into `acc` with AND (`is_and`) or OR.
    pub fn combine(
        &self,
        rel: Relation,
        other: &Vector,
        acc: &mut BoolVector,
        is_and: bool,
    ) -> Result<(), ValueError> {
        let n = self.len().min(other.len()).min(acc.len());
        for i in 1..=n {
            if acc.get(i) == is_and {
                acc.set(i, self.holds_against(rel, other, i)?);
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Relations against a constant
    // --------------------------------------------------------------------------------------------

    fn cmp_value(&self, value: &Value, i: usize) -> Result<Ordering, ValueError> {
        if self.is_null(i) {
            return Ok(if value.is_null() {
                Ordering::Equal
            } else {
                Ordering::Less
            });
        }
        match (&self.data, value) {
            (VectorData::Int(a), Value::Int(b)) => Ok(a[i].cmp(b)),
            (VectorData::Long(a), Value::Long(b)) => Ok(a[i].cmp(b)),
            (VectorData::Date(a), Value::Date(b)) => Ok(a[i].cmp(b)),
            (VectorData::String(a), Value::String(b)) => Ok(a[i].as_str().cmp(b.as_str())),
            _ => value::compare(&self.get(i), value),
        }
    }

    fn holds_against_value(&self, rel: Relation, value: &Value, i: usize) -> Result<bool, ValueError> {
        if rel == Relation::Or {
            return Ok(self.is_truthy(i) || value.is_truthy());
        }
        Ok(rel.holds(self.cmp_value(value, i)?))
    }

    /// Evaluates `self[i] <rel> value` for every slot.
    pub fn compare_value(&self, rel: Relation, value: &Value) -> Result<BoolVector, ValueError> {
        if value.is_null() {
            return Ok(self.compare_to_null(rel));
        }
        let n = self.len();
        let mut out = BoolVector::new(n, false);
        for i in 1..=n {
            out.set(i, self.holds_against_value(rel, value, i)?);
        }
        Ok(out)
    }

    /// Fuses `self[i] <rel> value` into `acc` with AND (`is_and`) or OR.
    pub fn combine_value(
        &self,
        rel: Relation,
        value: &Value,
        acc: &mut BoolVector,
        is_and: bool,
    ) -> Result<(), ValueError> {
        if value.is_null() {
            self.combine_null(rel, acc, is_and);
            return Ok(());
        }
        for i in 1..=self.len().min(acc.len()) {
            if acc.get(i) == is_and {
                acc.set(i, self.holds_against_value(rel, value, i)?);
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Integer arithmetic
    // --------------------------------------------------------------------------------------------

    /// Slot-wise remainder.  The result takes the sign of the dividend;
    /// a null operand or a zero divisor yields null.
    pub fn modulo(&self, other: &Vector) -> Result<Vector, ValueError> {
        self.arith(other, "%", |a, b| match (a, b) {
            (Value::Int(x), Value::Int(y)) => (*y != 0).then(|| Value::Int(x.wrapping_rem(*y))),
            (Value::Double(_), _) | (_, Value::Double(_)) => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                (y != 0.0).then(|| Value::Double(x % y))
            }
            _ => {
                let (x, y) = (a.as_i64().unwrap_or_default(), b.as_i64().unwrap_or_default());
                (y != 0).then(|| Value::Long(x.wrapping_rem(y)))
            }
        })
    }

    /// Slot-wise integer division truncating toward zero.  Double operands
    /// are divided and truncated to a long; a null operand or a zero
    /// divisor yields null.
    pub fn int_divide(&self, other: &Vector) -> Result<Vector, ValueError> {
        self.arith(other, "\\", |a, b| match (a, b) {
            (Value::Int(x), Value::Int(y)) => (*y != 0).then(|| Value::Int(x.wrapping_div(*y))),
            (Value::Double(_), _) | (_, Value::Double(_)) => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                (y != 0.0).then(|| Value::Long((x / y) as i64))
            }
            _ => {
                let (x, y) = (a.as_i64().unwrap_or_default(), b.as_i64().unwrap_or_default());
                (y != 0).then(|| Value::Long(x.wrapping_div(y)))
            }
        })
    }

    fn arith<F>(&self, other: &Vector, op: &'static str, f: F) -> Result<Vector, ValueError>
    where
        F: Fn(&Value, &Value) -> Option<Value>,
    {
        let legal = |k: ValueKind| k.is_numeric() || k == ValueKind::Null;
        let (left, right) = (self.element_kind(), other.element_kind());
        if !legal(left) || !legal(right) {
            return Err(ValueError::IllegalOperands { op, left, right });
        }

        let n = self.len().min(other.len());
        let mut out = Vec::with_capacity(n);
        for i in 1..=n {
            let (a, b) = (self.get(i), other.get(i));
            if a.is_null() || b.is_null() {
                out.push(Value::Null);
                continue;
            }
            if !a.kind().is_numeric() || !b.kind().is_numeric() {
                return Err(ValueError::IllegalOperands {
                    op,
                    left: a.kind(),
                    right: b.kind(),
                });
            }
            out.push(f(&a, &b).unwrap_or(Value::Null));
        }
        Ok(Vector::from_values(&out))
    }

    /// Storage kind as a value kind; `Object` vectors report their first
    /// non-null element.
    fn element_kind(&self) -> ValueKind {
        match &self.data {
            VectorData::Int(_) => ValueKind::Int,
            VectorData::Long(_) => ValueKind::Long,
            VectorData::Double(_) => ValueKind::Double,
            VectorData::Date(_) => ValueKind::Date,
            VectorData::String(_) => ValueKind::String,
            VectorData::Bool(_) => ValueKind::Bool,
            VectorData::Object(v) => v
                .iter()
                .skip(1)
                .map(Value::kind)
                .find(|k| *k != ValueKind::Null)
                .unwrap_or(ValueKind::Null),
        }
    }
}
