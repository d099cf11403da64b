//! Grouped aggregates evaluated while a join gathers a key group.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::encoding;
use crate::value::{self, Value};

use super::JoinError;

/// Aggregate function of a gathered join field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Sum,
    /// Number of non-null values.
    Count,
    Min,
    Max,
    Avg,
    /// Number of distinct non-null values.
    DistinctCount,
    /// Value of the group's first row.
    First,
}

impl AggKind {
    pub fn name(self) -> &'static str {
        match self {
            AggKind::Sum => "sum",
            AggKind::Count => "count",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Avg => "avg",
            AggKind::DistinctCount => "icount",
            AggKind::First => "first",
        }
    }
}

/// Running state of one aggregate.
#[derive(Debug, Clone)]
pub(crate) enum Aggregator {
    Sum(Value),
    Count(i64),
    Min(Value),
    Max(Value),
    Avg { sum: Value, count: i64 },
    Distinct(HashSet<Vec<u8>>),
    First(Option<Value>),
}

impl Aggregator {
    pub fn new(kind: AggKind) -> Self {
        match kind {
            AggKind::Sum => Aggregator::Sum(Value::Null),
            AggKind::Count => Aggregator::Count(0),
            AggKind::Min => Aggregator::Min(Value::Null),
            AggKind::Max => Aggregator::Max(Value::Null),
            AggKind::Avg => Aggregator::Avg {
                sum: Value::Null,
                count: 0,
            },
            AggKind::DistinctCount => Aggregator::Distinct(HashSet::new()),
            AggKind::First => Aggregator::First(None),
        }
    }

    pub fn gather(&mut self, v: &Value) -> Result<(), JoinError> {
        if let Aggregator::First(first) = self {
            if first.is_none() {
                *first = Some(v.clone());
            }
            return Ok(());
        }
        if v.is_null() {
            return Ok(());
        }
        match self {
            Aggregator::Sum(acc) => *acc = value::add(acc, v)?,
            Aggregator::Count(n) => *n += 1,
            Aggregator::Min(acc) => {
                if acc.is_null() || value::compare(v, acc)? == Ordering::Less {
                    *acc = v.clone();
                }
            }
            Aggregator::Max(acc) => {
                if value::compare(v, acc)? == Ordering::Greater {
                    *acc = v.clone();
                }
            }
            Aggregator::Avg { sum, count } => {
                *sum = value::add(sum, v)?;
                *count += 1;
            }
            Aggregator::Distinct(seen) => {
                seen.insert(encoding::encode_to_vec(v)?);
            }
            Aggregator::First(_) => {}
        }
        Ok(())
    }

    pub fn finish(self) -> Value {
        match self {
            Aggregator::Sum(v) | Aggregator::Min(v) | Aggregator::Max(v) => v,
            Aggregator::Count(n) => Value::Long(n),
            Aggregator::Avg { sum, count } => match sum.as_f64() {
                Some(s) if count > 0 => Value::Double(s / count as f64),
                _ => Value::Null,
            },
            Aggregator::Distinct(seen) => Value::Long(seen.len() as i64),
            Aggregator::First(v) => v.unwrap_or_default(),
        }
    }
}
