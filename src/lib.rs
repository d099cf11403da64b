//! # grouptable
//!
//! A columnar **group-table** storage engine and a streaming merge-join
//! engine built on top of it.
//!
//! A group table is one file made of fixed-size blocks. Columns, segment
//! statistics and the header are each stored as a linked chain of blocks.
//! Rows are written in key order, in segments whose min/max statistics let
//! readers skip whole segments. Joins consume sorted dimension cursors in
//! lock-step with a sorted driver and never rewind either side.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use grouptable::{ColumnDef, GroupTable, TableConfig, Value};
//! use grouptable::cursor::{RowCursor, collect_rows};
//!
//! let mut table = GroupTable::create(
//!     "/tmp/orders.grp",
//!     &[ColumnDef::key("id"), ColumnDef::value("amount")],
//!     &TableConfig::default(),
//! )
//! .unwrap();
//!
//! table
//!     .append(&[
//!         vec![Value::Int(1), Value::Double(9.5)],
//!         vec![Value::Int(2), Value::Double(3.0)],
//!     ])
//!     .unwrap();
//!
//! // Forward-only key search: positive = found, negative = insert position.
//! let mut searcher = table.searcher().unwrap();
//! assert_eq!(searcher.find_next_one(&Value::Int(2)).unwrap(), 2);
//!
//! // Scan
//! let rows = collect_rows(&mut table.cursor().unwrap()).unwrap();
//! assert_eq!(rows.len(), 2);
//! ```
//!
//! ## Features
//!
//! - **Block chains** with free-list reuse and amortised file growth.
//! - **Transactional header** rewrites: a crash leaves the previous header.
//! - **Segment pruning** for key search and filtered scans.
//! - **Merge joins**: inner, left, difference, time-key (as-of) and
//!   grouped-aggregate gathering.
//! - **Multipath scans** on worker threads.

pub mod block;
pub mod cursor;
pub mod encoding;
pub mod header;
pub mod join;
pub mod search;
pub mod table;
pub mod value;
pub mod vector;

pub use cursor::{CancelToken, CursorError, MemoryCursor, Row, RowCursor};
pub use join::{
    AggKind, FieldExpr, JoinError, JoinItem, JoinItemSpec, JoinKind, PrimaryJoin, TimeMatch,
};
pub use search::{RecordSeqSearcher, SearchError};
pub use table::{ColumnDef, GroupTable, Predicate, TableCursor, TableError, TableFlags};
pub use value::{Value, ValueError, ValueKind};
pub use vector::Relation;

use block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a new [`GroupTable`].
///
/// All fields have sensible defaults via [`TableConfig::default()`].
/// The configuration is validated when passed to [`GroupTable::create`].
///
/// # Example
///
/// ```rust
/// use grouptable::TableConfig;
///
/// // Use defaults (64 KiB blocks, 8192 rows per segment)
/// let config = TableConfig::default();
///
/// // Or customize
/// let config = TableConfig {
///     segment_rows: 1024,
///     time_key: true,
///     ..TableConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Size of every block in bytes.
    ///
    /// Rounded up to a multiple of 4096. Default: 64 KiB. Must be ≥ 4096
    /// and at most `u32::MAX` rounded down to a multiple of 4096.
    pub block_size: u32,

    /// Maximum rows per segment.
    ///
    /// Default: 8192. Must be ≥ 1.
    pub segment_rows: u32,

    /// Blocks added each time the file runs out of room.
    ///
    /// Default: 16. Must be ≥ 1.
    pub enlarge_blocks: u32,

    /// Table flag: values are compressed.
    pub compress: bool,

    /// Table flag: the last key column is a time key.
    pub time_key: bool,

    /// Table flag: the table carries a delete key.
    pub delete_key: bool,

    /// Table flag: reject columns mixing value kinds.
    pub check_pure: bool,

    /// Distribution expression, stored verbatim.
    pub distribute: Option<String>,

    /// Opaque hash of the write password.
    pub write_password_hash: Option<String>,

    /// Opaque hash of the read password.
    pub read_password_hash: Option<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            segment_rows: 8192,
            enlarge_blocks: 16,
            compress: false,
            time_key: false,
            delete_key: false,
            check_pure: false,
            distribute: None,
            write_password_hash: None,
            read_password_hash: None,
        }
    }
}

impl TableConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), TableError> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(TableError::InvalidConfig(format!(
                "block_size must be >= {MIN_BLOCK_SIZE}"
            )));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(TableError::InvalidConfig(format!(
                "block_size must be <= {MAX_BLOCK_SIZE}"
            )));
        }
        if self.segment_rows < 1 {
            return Err(TableError::InvalidConfig("segment_rows must be >= 1".into()));
        }
        if self.enlarge_blocks < 1 {
            return Err(TableError::InvalidConfig("enlarge_blocks must be >= 1".into()));
        }
        Ok(())
    }
}
