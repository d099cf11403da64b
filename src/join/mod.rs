//! # Streaming merge join
//!
//! A [`JoinItem`] wraps one **dimension** cursor sorted by its key columns
//! and answers probes from a **driver** that presents its keys in the same
//! order. Neither side is ever rewound: the dimension cursor only moves
//! forward, except for the single-row pushback used by the time-key scan.
//!
//! ## Equality probes
//!
//! ```text
//! dim key <  probe  -> advance the dimension, compare again
//! dim key == probe  -> match: evaluate fields (or gather the key group)
//! dim key >  probe  -> no match: inner drops, left fills nulls,
//!                      diff keeps the driver row
//! ```
//!
//! After a plain match the matched row stays current and `is_prev_match`
//! is set; the next probe advances past it first. A gather consumes the
//! whole group up front. Either way the finished field values are cached
//! with their key so that a repeated probe key returns the same values.
//!
//! ## Time-key probes
//!
//! With a time key the last key column is a time. Probes first align on
//! the other key columns, then look for the dimension row whose time is
//! the latest not after the probe's ([`TimeMatch::AtOrBefore`]) or
//! exactly equal to it ([`TimeMatch::Exact`]). The scan peeks one row
//! ahead and pushes it back when it is not acceptable, so no row is lost
//! to a later probe.
//!
//! Dimension rows are fetched in batches of at most `fetch_count`.

mod aggregate;
mod operator;

#[cfg(test)]
mod tests;

pub use aggregate::AggKind;
pub use operator::PrimaryJoin;

use std::cmp::Ordering;
use std::collections::VecDeque;

use thiserror::Error;
use tracing::trace;

use crate::cursor::{CursorError, Row, RowCursor};
use crate::encoding::EncodingError;
use crate::table::GroupTable;
use crate::value::{self, Value, ValueError};

use aggregate::Aggregator;

/// Default bound on rows per dimension fetch.
pub const FETCH_COUNT: usize = 9999;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum JoinError {
    /// Unknown columns, mismatched key counts and similar plan errors.
    #[error("invalid join configuration: {0}")]
    Config(String),

    /// Key comparison or aggregation failed.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Encoding a value for distinct counting failed.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The dimension or driver cursor failed.
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),
}

impl From<JoinError> for CursorError {
    fn from(e: JoinError) -> Self {
        match e {
            JoinError::Config(msg) => CursorError::Config(msg),
            JoinError::Value(e) => CursorError::Value(e),
            JoinError::Encoding(e) => CursorError::Encoding(e),
            JoinError::Cursor(e) => e,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Join configuration
// ------------------------------------------------------------------------------------------------

/// How unmatched and matched driver rows are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// Keep only matched driver rows.
    #[default]
    Inner,
    /// Keep every driver row; unmatched rows get null fields.
    Left,
    /// Keep only unmatched driver rows, with null fields.
    Diff,
}

/// Which dimension time a time-key probe accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMatch {
    /// The latest dimension time not after the probe time.
    #[default]
    AtOrBefore,
    /// Only a dimension time equal to the probe time.
    Exact,
}

/// A field produced by a join.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldExpr {
    /// The dimension column's value in the matched row.
    Column { column: String, alias: Option<String> },
    /// An aggregate over every dimension row of the matched key group.
    Gather {
        agg: AggKind,
        column: String,
        alias: Option<String>,
    },
}

impl FieldExpr {
    pub fn column(column: impl Into<String>) -> Self {
        FieldExpr::Column {
            column: column.into(),
            alias: None,
        }
    }

    pub fn gather(agg: AggKind, column: impl Into<String>) -> Self {
        FieldExpr::Gather {
            agg,
            column: column.into(),
            alias: None,
        }
    }

    /// Renames the output field.
    pub fn alias(self, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match self {
            FieldExpr::Column { column, .. } => FieldExpr::Column {
                column,
                alias: name,
            },
            FieldExpr::Gather { agg, column, .. } => FieldExpr::Gather {
                agg,
                column,
                alias: name,
            },
        }
    }

    /// Output field name.
    pub fn name(&self) -> String {
        match self {
            FieldExpr::Column { alias: Some(a), .. } | FieldExpr::Gather { alias: Some(a), .. } => {
                a.clone()
            }
            FieldExpr::Column { column, .. } => column.clone(),
            FieldExpr::Gather { agg, column, .. } => format!("{}({column})", agg.name()),
        }
    }

    fn source(&self) -> &str {
        match self {
            FieldExpr::Column { column, .. } | FieldExpr::Gather { column, .. } => column,
        }
    }

    /// Aggregate used when gathering; plain columns take the first row.
    fn agg(&self) -> AggKind {
        match self {
            FieldExpr::Column { .. } => AggKind::First,
            FieldExpr::Gather { agg, .. } => *agg,
        }
    }
}

/// Configuration of one [`JoinItem`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinItemSpec {
    /// Dimension key columns, in sort order.
    pub keys: Vec<String>,
    pub fields: Vec<FieldExpr>,
    pub kind: JoinKind,
    /// The last key column is a time key.
    pub time_key: bool,
    pub time_match: TimeMatch,
    /// Maximum rows per dimension fetch. Default: [`FETCH_COUNT`].
    pub fetch_count: usize,
}

impl JoinItemSpec {
    pub fn new<S: Into<String>>(keys: impl IntoIterator<Item = S>, fields: Vec<FieldExpr>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            fields,
            kind: JoinKind::Inner,
            time_key: false,
            time_match: TimeMatch::AtOrBefore,
            fetch_count: FETCH_COUNT,
        }
    }

    /// Spec keyed on `table`'s key columns, with time-key matching when
    /// the table has a time key.
    pub fn for_table(table: &GroupTable, fields: Vec<FieldExpr>) -> Self {
        Self {
            time_key: table.flags().time_key,
            ..Self::new(table.key_columns(), fields)
        }
    }

    pub fn with_kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_time_key(mut self, time_match: TimeMatch) -> Self {
        self.time_key = true;
        self.time_match = time_match;
        self
    }

    pub fn with_fetch_count(mut self, fetch_count: usize) -> Self {
        self.fetch_count = fetch_count;
        self
    }
}

// ------------------------------------------------------------------------------------------------
// PushbackCursor
// ------------------------------------------------------------------------------------------------

/// Row-at-a-time view of a cursor with bounded batches and a one-row
/// pushback slot.
pub struct PushbackCursor<C: RowCursor> {
    cursor: C,
    batch: VecDeque<Row>,
    pushed: Option<Row>,
    fetch_count: usize,
    exhausted: bool,
    fetches: usize,
}

impl<C: RowCursor> PushbackCursor<C> {
    pub fn new(cursor: C, fetch_count: usize) -> Self {
        Self {
            cursor,
            batch: VecDeque::new(),
            pushed: None,
            fetch_count: fetch_count.max(1),
            exhausted: false,
            fetches: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        self.cursor.columns()
    }

    /// Number of batches fetched from the underlying cursor.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Next row, refetching when the batch is drained.
    pub fn next_row(&mut self) -> Result<Option<Row>, CursorError> {
        if let Some(row) = self.pushed.take() {
            return Ok(Some(row));
        }
        if self.batch.is_empty() && !self.exhausted {
            match self.cursor.fetch(self.fetch_count)? {
                Some(rows) => {
                    self.fetches += 1;
                    trace!(rows = rows.len(), fetches = self.fetches, "dimension batch fetched");
                    self.batch = rows.into();
                }
                None => self.exhausted = true,
            }
        }
        Ok(self.batch.pop_front())
    }

    /// Returns `row` to the front of the stream.
    pub fn unread(&mut self, row: Row) {
        if let Some(earlier) = self.pushed.replace(row) {
            self.batch.push_front(earlier);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// JoinItem
// ------------------------------------------------------------------------------------------------

/// One dimension cursor probed in lock-step with a driver.
pub struct JoinItem {
    kind: JoinKind,
    time_key: bool,
    time_match: TimeMatch,
    cursor: PushbackCursor<Box<dyn RowCursor>>,
    key_idx: Vec<usize>,
    field_idx: Vec<usize>,
    fields: Vec<FieldExpr>,
    gather: bool,
    started: bool,
    current: Option<Row>,
    is_prev_match: bool,
    /// The current row was emitted by the last time-key match. Later
    /// probes may match it again; only `pop_top` moves past it.
    time_matched: bool,
    /// Key of the last match (the probe key, or the matched full key in
    /// time mode) and its finished field values.
    cache: Option<(Vec<Value>, Vec<Value>)>,
}

impl std::fmt::Debug for JoinItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinItem")
            .field("kind", &self.kind)
            .field("time_key", &self.time_key)
            .field("gather", &self.gather)
            .field("is_prev_match", &self.is_prev_match)
            .finish()
    }
}

impl JoinItem {
    /// Resolves `spec` against the dimension cursor's columns.
    pub fn new(spec: JoinItemSpec, dimension: impl RowCursor + 'static) -> Result<Self, JoinError> {
        let columns = dimension.columns().to_vec();
        let resolve = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| JoinError::Config(format!("dimension has no column '{name}'")))
        };
        if spec.keys.is_empty() {
            return Err(JoinError::Config("a join needs at least one key".into()));
        }
        if spec.fetch_count == 0 {
            return Err(JoinError::Config("fetch_count must be >= 1".into()));
        }
        let key_idx = spec
            .keys
            .iter()
            .map(|k| resolve(k))
            .collect::<Result<Vec<_>, _>>()?;
        let field_idx = spec
            .fields
            .iter()
            .map(|f| resolve(f.source()))
            .collect::<Result<Vec<_>, _>>()?;
        let gather = spec
            .fields
            .iter()
            .any(|f| matches!(f, FieldExpr::Gather { .. }));

        let dimension: Box<dyn RowCursor> = Box::new(dimension);
        Ok(Self {
            kind: spec.kind,
            time_key: spec.time_key,
            time_match: spec.time_match,
            cursor: PushbackCursor::new(dimension, spec.fetch_count),
            key_idx,
            field_idx,
            fields: spec.fields,
            gather,
            started: false,
            current: None,
            is_prev_match: false,
            time_matched: false,
            cache: None,
        })
    }

    pub fn key_count(&self) -> usize {
        self.key_idx.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(FieldExpr::name).collect()
    }

    /// Key tuple of the dimension's current row, if any.
    pub fn current_keys(&self) -> Option<Vec<Value>> {
        self.current.as_ref().map(|r| self.row_keys(r))
    }

    /// Batches fetched from the dimension so far.
    pub fn fetches(&self) -> usize {
        self.cursor.fetches()
    }

    /// Probes with `keys`, dispatching on the time-key setting.
    pub fn probe(&mut self, keys: &[Value], out: &mut [Value]) -> Result<bool, JoinError> {
        if self.time_key {
            self.time_key_join(keys, out)
        } else {
            self.join(keys, out)
        }
    }

    /// Equality probe.
    ///
    /// Writes the new field values into `out` and returns whether the
    /// driver row is kept under the join kind.
    pub fn join(&mut self, keys: &[Value], out: &mut [Value]) -> Result<bool, JoinError> {
        self.check_probe(keys, out)?;
        let n = self.key_idx.len();

        if let Some(hit) = self.cached(keys, n)? {
            return Ok(self.emit(Some(hit), out));
        }
        if self.is_prev_match {
            self.is_prev_match = false;
            self.advance()?;
        }
        self.start()?;

        loop {
            let Some(row) = &self.current else {
                return Ok(self.emit(None, out));
            };
            match value::compare_tuples(&self.row_keys(row), keys, n)? {
                Ordering::Less => self.advance()?,
                Ordering::Greater => return Ok(self.emit(None, out)),
                Ordering::Equal => {
                    let values = if self.gather {
                        self.gather_group(n)?
                    } else {
                        self.is_prev_match = true;
                        self.plain(row)
                    };
                    self.cache = Some((keys[..n].to_vec(), values.clone()));
                    return Ok(self.emit(Some(values), out));
                }
            }
        }
    }

    /// Time-key probe: aligns on every key but the last, then matches the
    /// time according to the configured [`TimeMatch`].
    pub fn time_key_join(&mut self, keys: &[Value], out: &mut [Value]) -> Result<bool, JoinError> {
        self.check_probe(keys, out)?;
        let n = self.key_idx.len();
        let t = n - 1;

        if let Some(hit) = self.cached(keys, n)? {
            return Ok(self.emit(Some(hit), out));
        }
        self.start()?;

        while let Some(row) = &self.current {
            if value::compare_tuples(&self.row_keys(row), keys, t)? != Ordering::Less {
                break;
            }
            self.advance()?;
        }

        let values = match self.time_match {
            TimeMatch::AtOrBefore => self.scan_at_or_before(keys, t)?,
            TimeMatch::Exact => self.scan_exact(keys, t)?,
        };
        // An exact gather has already consumed its group.
        self.time_matched =
            values.is_some() && !(self.gather && self.time_match == TimeMatch::Exact);
        Ok(self.emit(values, out))
    }

    /// Emits the current row (or its gathered group) as `(keys, fields)`
    /// and moves past it; `None` once the dimension is exhausted.
    ///
    /// A row already emitted by the preceding probe, equality or time-key,
    /// is skipped.
    pub fn pop_top(&mut self) -> Result<Option<(Vec<Value>, Vec<Value>)>, JoinError> {
        if self.is_prev_match || self.time_matched {
            self.is_prev_match = false;
            self.time_matched = false;
            self.advance()?;
        }
        self.start()?;
        let Some(row) = &self.current else {
            return Ok(None);
        };
        let keys = self.row_keys(row);
        let values = if self.gather {
            self.gather_group(self.key_idx.len())?
        } else {
            let values = self.plain(row);
            self.advance()?;
            values
        };
        self.cache = None;
        Ok(Some((keys, values)))
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn check_probe(&self, keys: &[Value], out: &[Value]) -> Result<(), JoinError> {
        if keys.len() != self.key_idx.len() {
            return Err(JoinError::Config(format!(
                "probe has {} keys, join item has {}",
                keys.len(),
                self.key_idx.len()
            )));
        }
        if out.len() != self.fields.len() {
            return Err(JoinError::Config(format!(
                "output slice has {} slots, join item has {} fields",
                out.len(),
                self.fields.len()
            )));
        }
        Ok(())
    }

    fn cached(&self, keys: &[Value], n: usize) -> Result<Option<Vec<Value>>, JoinError> {
        match &self.cache {
            Some((k, v)) if value::compare_tuples(k, keys, n)? == Ordering::Equal => {
                Ok(Some(v.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Applies the join kind to a match (`Some`) or a miss (`None`).
    fn emit(&self, values: Option<Vec<Value>>, out: &mut [Value]) -> bool {
        match (values, self.kind) {
            (Some(values), JoinKind::Inner | JoinKind::Left) => {
                out.clone_from_slice(&values);
                true
            }
            (Some(_), JoinKind::Diff) => {
                out.fill(Value::Null);
                false
            }
            (None, kind) => {
                out.fill(Value::Null);
                kind != JoinKind::Inner
            }
        }
    }

    fn start(&mut self) -> Result<(), JoinError> {
        if !self.started {
            self.started = true;
            self.current = self.cursor.next_row()?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<(), JoinError> {
        self.current = self.cursor.next_row()?;
        Ok(())
    }

    fn row_keys(&self, row: &Row) -> Vec<Value> {
        self.key_idx.iter().map(|i| row[*i].clone()).collect()
    }

    fn plain(&self, row: &Row) -> Vec<Value> {
        self.field_idx.iter().map(|i| row[*i].clone()).collect()
    }

    fn aggregate<'r>(&self, rows: impl IntoIterator<Item = &'r Row>) -> Result<Vec<Value>, JoinError> {
        let mut aggs: Vec<Aggregator> = self.fields.iter().map(|f| Aggregator::new(f.agg())).collect();
        for row in rows {
            for (agg, idx) in aggs.iter_mut().zip(&self.field_idx) {
                agg.gather(&row[*idx])?;
            }
        }
        Ok(aggs.into_iter().map(Aggregator::finish).collect())
    }

    /// Consumes the current row and every following row sharing its first
    /// `n` keys, across batch boundaries, and aggregates them.
    fn gather_group(&mut self, n: usize) -> Result<Vec<Value>, JoinError> {
        let Some(first) = self.current.take() else {
            return self.aggregate(std::iter::empty());
        };
        let group_key = self.row_keys(&first);
        let mut group = vec![first];
        loop {
            let Some(row) = self.cursor.next_row()? else {
                self.current = None;
                break;
            };
            if value::compare_tuples(&self.row_keys(&row), &group_key, n)? == Ordering::Equal {
                group.push(row);
            } else {
                self.current = Some(row);
                break;
            }
        }
        trace!(rows = group.len(), "key group gathered");
        self.aggregate(&group)
    }

    /// `true` if `row` shares the probe's leading keys and its time is
    /// not after the probe's.
    fn time_fits(&self, row: &Row, keys: &[Value], t: usize) -> Result<bool, JoinError> {
        let row_keys = self.row_keys(row);
        if value::compare_tuples(&row_keys, keys, t)? != Ordering::Equal {
            return Ok(false);
        }
        Ok(value::compare(&row_keys[t], &keys[t])? != Ordering::Greater)
    }

    fn scan_at_or_before(&mut self, keys: &[Value], t: usize) -> Result<Option<Vec<Value>>, JoinError> {
        let Some(row) = &self.current else {
            return Ok(None);
        };
        if !self.time_fits(row, keys, t)? {
            return Ok(None);
        }

        // Rows before the best one that share its full key.
        let mut group: Vec<Row> = Vec::new();
        loop {
            let Some(next) = self.cursor.next_row()? else {
                break;
            };
            if !self.time_fits(&next, keys, t)? {
                self.cursor.unread(next);
                break;
            }
            if let Some(prev) = self.current.replace(next) {
                let same = self.current.as_ref().map(|c| self.row_keys(c)) == Some(self.row_keys(&prev));
                if same {
                    group.push(prev);
                } else {
                    group.clear();
                }
            }
        }

        let Some(best) = &self.current else {
            return Ok(None);
        };
        let full_key = self.row_keys(best);
        if let Some((k, v)) = &self.cache {
            if value::compare_tuples(k, &full_key, t + 1)? == Ordering::Equal {
                return Ok(Some(v.clone()));
            }
        }
        let values = if self.gather {
            self.aggregate(group.iter().chain(std::iter::once(best)))?
        } else {
            self.plain(best)
        };
        self.cache = Some((full_key, values.clone()));
        Ok(Some(values))
    }

    fn scan_exact(&mut self, keys: &[Value], t: usize) -> Result<Option<Vec<Value>>, JoinError> {
        loop {
            let Some(row) = &self.current else {
                return Ok(None);
            };
            let row_keys = self.row_keys(row);
            if value::compare_tuples(&row_keys, keys, t)? != Ordering::Equal {
                return Ok(None);
            }
            match value::compare(&row_keys[t], &keys[t])? {
                Ordering::Less => self.advance()?,
                Ordering::Equal => break,
                Ordering::Greater => return Ok(None),
            }
        }

        let values = if self.gather {
            self.gather_group(t + 1)?
        } else {
            match &self.current {
                Some(row) => self.plain(row),
                None => return Ok(None),
            }
        };
        self.cache = Some((keys.to_vec(), values.clone()));
        Ok(Some(values))
    }
}
