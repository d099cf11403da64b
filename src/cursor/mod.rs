//! # Row cursors
//!
//! Every producer of rows in the crate (a table scan, an in-memory batch,
//! a join operator) is a pull-based [`RowCursor`]: the consumer asks for
//! at most `max` rows and receives `None` once the stream is exhausted.
//!
//! Cursors are single-threaded. Parallelism comes from splitting a table
//! into independent cursor *paths* and driving each one on its own thread
//! with [`run_paths`]; nothing is shared between paths except the
//! immutable snapshot they read from and an optional [`CancelToken`].

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use thiserror::Error;
use tracing::{debug, error};

use crate::block::BlockError;
use crate::encoding::EncodingError;
use crate::value::{Value, ValueError};

/// One row: a value per cursor column.
pub type Row = Vec<Value>;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CursorError {
    /// The path was cancelled through its [`CancelToken`].
    #[error("cursor interrupted")]
    Interrupted,

    /// Evaluation error while filtering or joining rows.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Block-level error while loading segment data.
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Decoding error while loading segment data.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A cursor was wired up with columns or keys it cannot resolve.
    #[error("invalid cursor configuration: {0}")]
    Config(String),

    /// A worker thread panicked or failed outside the cursor protocol.
    #[error("worker failed: {0}")]
    Worker(String),
}

// ------------------------------------------------------------------------------------------------
// RowCursor
// ------------------------------------------------------------------------------------------------

/// A pull-based stream of rows.
pub trait RowCursor: Send {
    /// Names of the columns every fetched row carries, in order.
    fn columns(&self) -> &[String];

    /// Returns up to `max` rows, or `None` once the stream is exhausted.
    ///
    /// A returned batch is never empty.
    fn fetch(&mut self, max: usize) -> Result<Option<Vec<Row>>, CursorError>;
}

impl<C: RowCursor + ?Sized> RowCursor for Box<C> {
    fn columns(&self) -> &[String] {
        (**self).columns()
    }

    fn fetch(&mut self, max: usize) -> Result<Option<Vec<Row>>, CursorError> {
        (**self).fetch(max)
    }
}

/// Drains a cursor into a vector.
pub fn collect_rows<C: RowCursor + ?Sized>(cursor: &mut C) -> Result<Vec<Row>, CursorError> {
    let mut out = Vec::new();
    while let Some(batch) = cursor.fetch(1024)? {
        out.extend(batch);
    }
    Ok(out)
}

/// A cursor over rows already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl MemoryCursor {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>, rows: Vec<Row>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: rows.into(),
        }
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self, max: usize) -> Result<Option<Vec<Row>>, CursorError> {
        if self.rows.is_empty() || max == 0 {
            return Ok(None);
        }
        let n = max.min(self.rows.len());
        Ok(Some(self.rows.drain(..n).collect()))
    }
}

// ------------------------------------------------------------------------------------------------
// Cancellation
// ------------------------------------------------------------------------------------------------

/// Shared interrupt flag for a unit of work.
///
/// Cursors check the token before every blocking fetch and fail with
/// [`CursorError::Interrupted`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Interrupted)` once cancelled.
    pub fn check(&self) -> Result<(), CursorError> {
        if self.is_cancelled() {
            return Err(CursorError::Interrupted);
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Multipath execution
// ------------------------------------------------------------------------------------------------

/// Runs `work` on every cursor path, one thread per path, and returns the
/// results in path order.
///
/// Each path exclusively owns its cursor. The first error (in path order)
/// is returned after every worker has finished.
pub fn run_paths<C, T, F>(paths: Vec<C>, work: F) -> Result<Vec<T>, CursorError>
where
    C: RowCursor,
    T: Send,
    F: Fn(usize, C) -> Result<T, CursorError> + Sync,
{
    let count = paths.len();
    let (sender, receiver) = crossbeam::channel::unbounded::<(usize, Result<T, CursorError>)>();
    let work = &work;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(count);
        for (index, cursor) in paths.into_iter().enumerate() {
            let sender = sender.clone();
            handles.push(scope.spawn(move || {
                let result = work(index, cursor);
                if sender.send((index, result)).is_err() {
                    error!(path = index, "result channel closed before worker finished");
                }
            }));
        }
        drop(sender);

        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(path = index, "cursor worker panicked");
            }
        }
    });

    let mut slots: Vec<Option<Result<T, CursorError>>> = (0..count).map(|_| None).collect();
    for (index, result) in receiver.iter() {
        slots[index] = Some(result);
    }
    debug!(paths = count, "multipath run finished");

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| Err(CursorError::Worker(format!("path {index} panicked"))))
        })
        .collect()
}
