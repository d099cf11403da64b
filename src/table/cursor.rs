//! Segment-at-a-time table scans with projection and filters.
//!
//! A cursor walks a contiguous range of segments. For each segment it
//! first checks every filter against the segment's min/max statistics and
//! skips the segment without reading its rows when any filter cannot
//! hold. Surviving segments are loaded column by column and the filters
//! are evaluated batch-at-a-time with [`Vector`] relations.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use tracing::trace;

use crate::cursor::{CancelToken, CursorError, Row, RowCursor};
use crate::value::{self, Value};
use crate::vector::{BoolVector, Relation, Vector};

use super::TableError;
use super::snapshot::{ColumnData, TableSnapshot};

/// `column <relation> value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub relation: Relation,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, relation: Relation, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            relation,
            value: value.into(),
        }
    }
}

/// `true` when no row with values in `[min, max]` can satisfy
/// `value <rel> constant`.
fn excludes(rel: Relation, min: &Value, max: &Value, constant: &Value) -> bool {
    if constant.is_null() {
        return false;
    }
    let (Ok(lo), Ok(hi)) = (value::compare(min, constant), value::compare(max, constant)) else {
        return false;
    };
    match rel {
        Relation::Equal => lo == Ordering::Greater || hi == Ordering::Less,
        Relation::Greater => hi != Ordering::Greater,
        Relation::GreaterEqual => hi == Ordering::Less,
        Relation::Less => lo != Ordering::Less,
        Relation::LessEqual => lo == Ordering::Greater,
        Relation::NotEqual | Relation::Or => false,
    }
}

/// A [`RowCursor`] over one part of a [`TableSnapshot`].
#[derive(Debug)]
pub struct TableCursor {
    snapshot: TableSnapshot,
    annex: Option<usize>,
    segments: Range<usize>,
    next_segment: usize,
    names: Vec<String>,
    selected: Vec<usize>,
    predicates: Vec<(usize, Relation, Value)>,
    columns: HashMap<usize, ColumnData>,
    row_counts: Option<Vec<u32>>,
    pending: VecDeque<Row>,
    cancel: Option<CancelToken>,
    pruned: usize,
}

impl TableCursor {
    pub(crate) fn new(
        snapshot: TableSnapshot,
        annex: Option<usize>,
        segments: Range<usize>,
    ) -> Result<Self, TableError> {
        let part = snapshot.part(annex);
        let names = part.columns.iter().map(|c| c.name.clone()).collect();
        let selected = (0..part.columns.len()).collect();
        Ok(Self {
            next_segment: segments.start,
            segments,
            snapshot,
            annex,
            names,
            selected,
            predicates: Vec::new(),
            columns: HashMap::new(),
            row_counts: None,
            pending: VecDeque::new(),
            cancel: None,
            pruned: 0,
        })
    }

    fn resolve(&self, column: &str) -> Result<usize, TableError> {
        self.snapshot
            .part(self.annex)
            .column_index(column)
            .ok_or_else(|| TableError::UnknownColumn(column.to_string()))
    }

    /// Restricts output to `columns`, in that order.
    pub fn select(mut self, columns: &[&str]) -> Result<Self, TableError> {
        let selected = columns
            .iter()
            .map(|c| self.resolve(c))
            .collect::<Result<Vec<_>, _>>()?;
        self.names = columns.iter().map(|c| c.to_string()).collect();
        self.selected = selected;
        Ok(self)
    }

    /// Adds a filter; all filters must hold for a row to be returned.
    pub fn filter(mut self, predicate: Predicate) -> Result<Self, TableError> {
        let column = self.resolve(&predicate.column)?;
        self.predicates
            .push((column, predicate.relation, predicate.value));
        Ok(self)
    }

    /// Fails the next fetch with [`CursorError::Interrupted`] once
    /// `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Segments skipped on statistics alone so far.
    pub fn pruned_segments(&self) -> usize {
        self.pruned
    }

    fn column(&mut self, column: usize) -> Result<&ColumnData, CursorError> {
        if !self.columns.contains_key(&column) {
            let data = self.snapshot.column(self.annex, column)?;
            self.columns.insert(column, data);
        }
        self.columns
            .get(&column)
            .ok_or_else(|| CursorError::Config(format!("column {column} not loaded")))
    }

    fn is_pruned(&mut self, segment: usize) -> Result<bool, CursorError> {
        for k in 0..self.predicates.len() {
            let (column, rel, constant) = self.predicates[k].clone();
            let entry = self.column(column)?.entry(segment)?;
            if let Some((min, max)) = &entry.bounds {
                if excludes(rel, min, max, &constant) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Loads one segment and queues the rows that pass every filter.
    fn load_segment(&mut self, segment: usize) -> Result<(), CursorError> {
        if self.row_counts.is_none() {
            let counts = self
                .snapshot
                .segment_records(self.annex)?
                .into_iter()
                .map(|r| r.rows)
                .collect();
            self.row_counts = Some(counts);
        }
        let rows = self
            .row_counts
            .as_ref()
            .and_then(|c| c.get(segment))
            .copied()
            .unwrap_or(0) as usize;

        if self.is_pruned(segment)? {
            self.pruned += 1;
            trace!(segment, "segment pruned by statistics");
            return Ok(());
        }

        let mut needed: Vec<usize> = self.selected.clone();
        needed.extend(self.predicates.iter().map(|p| p.0));
        needed.sort_unstable();
        needed.dedup();

        for &column in &needed {
            self.column(column)?;
        }
        let mut loaded: HashMap<usize, Vec<Value>> = HashMap::with_capacity(needed.len());
        for column in needed {
            let data = self
                .columns
                .get(&column)
                .ok_or_else(|| CursorError::Config(format!("column {column} not loaded")))?;
            loaded.insert(column, self.snapshot.load(data, segment, rows)?);
        }

        let mut mask = BoolVector::new(rows, true);
        for (column, rel, constant) in &self.predicates {
            let values = loaded.get(column).map(Vec::as_slice).unwrap_or(&[]);
            Vector::from_values(values).combine_value(*rel, constant, &mut mask, true)?;
        }

        for slot in mask.true_slots() {
            let row = self
                .selected
                .iter()
                .map(|c| {
                    loaded
                        .get(c)
                        .and_then(|v| v.get(slot - 1))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            self.pending.push_back(row);
        }
        trace!(segment, rows, kept = mask.true_count(), "segment loaded");
        Ok(())
    }
}

impl RowCursor for TableCursor {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn fetch(&mut self, max: usize) -> Result<Option<Vec<Row>>, CursorError> {
        if max == 0 {
            return Ok(None);
        }
        while self.pending.is_empty() {
            if let Some(token) = &self.cancel {
                token.check()?;
            }
            if self.next_segment >= self.segments.end {
                return Ok(None);
            }
            let segment = self.next_segment;
            self.next_segment += 1;
            self.load_segment(segment)?;
        }
        let n = max.min(self.pending.len());
        Ok(Some(self.pending.drain(..n).collect()))
    }
}
