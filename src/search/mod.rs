//! # Forward-only key search
//!
//! [`RecordSeqSearcher`] maps a sequence of non-decreasing keys to row
//! numbers of a sorted group table while reading as little as possible:
//!
//! ```text
//! key > segment max   -> skip the segment using its persisted last key
//! key == segment max  -> answer is the segment's last row (no load)
//! key < segment max   -> load the segment's key columns once, then scan
//!                        forward from where the previous call stopped
//! ```
//!
//! Row numbers are 1-based and absolute. A positive result is the row
//! holding the key. A negative result `-p` means "not found, would be
//! inserted before row `p`". Past the last segment the result is
//! `-(row_count + 1)`.
//!
//! Keys must be passed in non-decreasing order. A smaller key than one
//! already passed yields a stale position; this is not checked.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::slice;

use thiserror::Error;
use tracing::trace;

use crate::cursor::CursorError;
use crate::table::{ColumnData, TableSnapshot};
use crate::value::{self, Value, ValueError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SearchError {
    /// The table has no key columns to search on.
    #[error("table has no key columns")]
    NoKey,

    /// The probe does not fit the table's key.
    #[error("probe has {found} key values, table has {expected} key columns")]
    KeyCount { expected: usize, found: usize },

    /// Key comparison failed.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Loading segment statistics or keys failed.
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),
}

// ------------------------------------------------------------------------------------------------
// RecordSeqSearcher
// ------------------------------------------------------------------------------------------------

/// Incremental key searcher over the base part of a [`TableSnapshot`].
#[derive(Debug)]
pub struct RecordSeqSearcher {
    snapshot: TableSnapshot,
    key_count: usize,
    columns: Vec<ColumnData>,
    /// Row count and last key of every segment.
    segments: Vec<(u32, Vec<Value>)>,
    segment: usize,
    prev_rows: u64,
    /// 1-based scan position inside the loaded segment; `None` until the
    /// segment's keys are loaded.
    cur_index: Option<usize>,
    /// Key tuples of the loaded segment; slot 0 is unused.
    keys: Vec<Vec<Value>>,
}

impl RecordSeqSearcher {
    pub fn new(snapshot: TableSnapshot) -> Result<Self, SearchError> {
        let key_count = snapshot.part(None).key_count();
        if key_count == 0 {
            return Err(SearchError::NoKey);
        }
        let columns = (0..key_count)
            .map(|k| snapshot.column(None, k))
            .collect::<Result<Vec<_>, _>>()?;
        let segments = snapshot
            .segment_records(None)?
            .into_iter()
            .map(|r| (r.rows, r.last_key))
            .collect();
        Ok(Self {
            snapshot,
            key_count,
            columns,
            segments,
            segment: 0,
            prev_rows: 0,
            cur_index: None,
            keys: Vec::new(),
        })
    }

    /// `true` once every segment has been passed.
    pub fn is_end(&self) -> bool {
        self.segment >= self.segments.len()
    }

    /// Searches a single-column key.
    pub fn find_next_one(&mut self, key: &Value) -> Result<i64, SearchError> {
        self.find_next(slice::from_ref(key))
    }

    /// Searches a key tuple (a prefix of the table's key columns).
    pub fn find_next(&mut self, probe: &[Value]) -> Result<i64, SearchError> {
        let n = probe.len();
        if n == 0 || n > self.key_count {
            return Err(SearchError::KeyCount {
                expected: self.key_count,
                found: n,
            });
        }

        loop {
            let Some((rows, max)) = self.segments.get(self.segment) else {
                return Ok(-(self.prev_rows as i64) - 1);
            };
            let rows = *rows as usize;
            match value::compare_tuples(probe, max, n)? {
                Ordering::Greater => self.next_segment(),
                Ordering::Equal => {
                    self.cur_index = Some(rows);
                    return Ok(self.prev_rows as i64 + rows as i64);
                }
                Ordering::Less => {
                    let start = match self.cur_index {
                        Some(i) => i,
                        None => {
                            self.load_keys(rows)?;
                            1
                        }
                    };
                    for i in start..rows {
                        match value::compare_tuples(probe, &self.keys[i], n)? {
                            Ordering::Greater => continue,
                            Ordering::Equal => {
                                self.cur_index = Some(i);
                                return Ok(self.prev_rows as i64 + i as i64);
                            }
                            Ordering::Less => {
                                self.cur_index = Some(i);
                                return Ok(-(self.prev_rows as i64) - i as i64);
                            }
                        }
                    }
                    self.cur_index = Some(rows);
                    return Ok(-(self.prev_rows as i64) - rows as i64);
                }
            }
        }
    }

    fn next_segment(&mut self) {
        if let Some((rows, _)) = self.segments.get(self.segment) {
            self.prev_rows += u64::from(*rows);
        }
        self.segment += 1;
        self.cur_index = None;
        self.keys.clear();
        trace!(segment = self.segment, prev_rows = self.prev_rows, "searcher advanced segment");
    }

    /// Loads the key columns of the current segment as row tuples.
    fn load_keys(&mut self, rows: usize) -> Result<(), SearchError> {
        let mut keys: Vec<Vec<Value>> = vec![Vec::with_capacity(self.key_count); rows + 1];
        for column in &self.columns {
            let values = self.snapshot.load(column, self.segment, rows)?;
            for (i, v) in values.into_iter().enumerate() {
                keys[i + 1].push(v);
            }
        }
        self.keys = keys;
        trace!(segment = self.segment, rows, "searcher loaded segment keys");
        Ok(())
    }
}
