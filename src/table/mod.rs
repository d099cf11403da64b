//! # Group table
//!
//! A group table is a column-oriented table stored in one block file.
//! Every column owns two block chains: its **data** (cell values stored
//! back to back) and its **segment statistics**. Rows are written in
//! segments of at most `segment_rows` rows; each append call closes its
//! own segments.
//!
//! ## Persisted structure
//!
//! ```text
//! header.metadata = TableMeta
//!   flags, segment_rows
//!   base part:   columns[], segment chain, segment_count, row_count, last_key
//!   annexes[]:   name + part (first column is the "_guide" row reference)
//!
//! part segment chain:     [rows u32][last key tuple]            per segment
//! column segment chain:   [data offset Long40][byte_len u32]
//!                         [has bounds][min Value][max Value]     per segment
//! column data chain:      Value Value Value ...
//! ```
//!
//! Key columns form a prefix of the column list. Rows must be appended in
//! non-decreasing key order, which makes each segment's last key tuple its
//! maximum and lets the searcher and cursors prune segments without
//! loading their rows.
//!
//! ## Concurrency
//!
//! Structural changes go through one header transaction per call
//! (see [`crate::header`]). Readers work on a [`TableSnapshot`], a
//! read-only memory map of the file plus a copy of the table metadata.
//! Committed blocks are never rewritten, so snapshots need no locking.

mod cursor;
mod encoding_impls;
mod snapshot;

#[cfg(test)]
mod tests;

pub use cursor::{Predicate, TableCursor};
pub use snapshot::TableSnapshot;
pub(crate) use snapshot::ColumnData;

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::TableConfig;
use crate::block::{BlockError, BlockLink, BlockLinkReader, BlockLinkWriter, normalize_block_size};
use crate::cursor::{CursorError, Row};
use crate::encoding::{self, Encode, EncodingError};
use crate::header::{Header, HeaderError, HeaderManager, Transaction};
use crate::search::{RecordSeqSearcher, SearchError};
use crate::value::{self, Value, ValueError, ValueKind};

/// Name of the row-reference column every annex starts with.
pub const GUIDE_COLUMN: &str = "_guide";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or transaction error.
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    /// Block-level error.
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Encoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Key comparison failed.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Segment loading failed.
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),

    /// Invalid configuration or column definition.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A column name that the table does not have.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// A row whose width does not match the column count.
    #[error("row has {found} values, table has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    /// A row whose key sorts before the previous row's key.
    #[error("row {row} breaks key order")]
    Unsorted { row: u64 },

    /// A value whose kind differs from the column's kind on a pure table.
    #[error("column '{column}' holds {expected} values, got {found}")]
    ImpureColumn {
        column: String,
        expected: ValueKind,
        found: ValueKind,
    },

    /// Annexes cannot be attached to a table with a time key.
    #[error("tables with a time key cannot have annexes")]
    TimeKeyAnnex,

    /// No annex with that name.
    #[error("unknown annex '{0}'")]
    UnknownAnnex(String),

    /// An annex row refers to a base row that does not exist.
    #[error("guide {guide} is outside the base table (1..={rows})")]
    GuideOutOfRange { guide: u64, rows: u64 },

    /// The file holds no readable table metadata.
    #[error("corrupt table metadata: {0}")]
    Corrupt(String),

    /// Search over the table failed.
    #[error("Search error: {0}")]
    Search(#[from] SearchError),
}

// ------------------------------------------------------------------------------------------------
// Public descriptors
// ------------------------------------------------------------------------------------------------

/// Definition of one column at table creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Key columns must come first in the column list.
    pub key: bool,
}

impl ColumnDef {
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: true,
        }
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: false,
        }
    }
}

/// Table-wide flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableFlags {
    pub compress: bool,
    /// The last key column is a time key.
    pub time_key: bool,
    pub delete_key: bool,
    /// Columns must hold values of a single kind.
    pub check_pure: bool,
}

/// One persisted segment of a table part.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// 1-based number of the segment's first row.
    pub first_row: u64,
    pub rows: u32,
    /// Key tuple of the segment's last row.
    pub last_key: Vec<Value>,
}

// ------------------------------------------------------------------------------------------------
// Persisted metadata
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnMeta {
    pub name: String,
    pub key: bool,
    /// Kind of the first non-null value ever written.
    pub kind: Option<ValueKind>,
    pub data: BlockLink,
    pub segments: BlockLink,
}

/// A base table or an annex: columns plus their shared segmentation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartMeta {
    pub columns: Vec<ColumnMeta>,
    pub segment_link: BlockLink,
    pub segment_count: u32,
    pub row_count: u64,
    pub last_key: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnnexMeta {
    pub name: String,
    pub part: PartMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableMeta {
    pub flags: TableFlags,
    pub segment_rows: u32,
    pub base: PartMeta,
    pub annexes: Vec<AnnexMeta>,
}

/// Per-segment record of the part segment chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SegmentRecord {
    pub rows: u32,
    pub last_key: Vec<Value>,
}

/// Per-segment record of a column segment chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SegmentEntry {
    /// Logical offset of the segment's values in the column data chain.
    pub position: u64,
    pub byte_len: u32,
    /// `(min, max)` under the key ordering; absent when the segment mixes
    /// incomparable kinds.
    pub bounds: Option<(Value, Value)>,
}

impl PartMeta {
    fn new(defs: &[ColumnDef]) -> Self {
        Self {
            columns: defs
                .iter()
                .map(|d| ColumnMeta {
                    name: d.name.clone(),
                    key: d.key,
                    kind: None,
                    data: BlockLink::default(),
                    segments: BlockLink::default(),
                })
                .collect(),
            segment_link: BlockLink::default(),
            segment_count: 0,
            row_count: 0,
            last_key: Vec::new(),
        }
    }

    pub fn key_count(&self) -> usize {
        self.columns.iter().take_while(|c| c.key).count()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn defs(&self) -> Vec<ColumnDef> {
        self.columns
            .iter()
            .map(|c| ColumnDef {
                name: c.name.clone(),
                key: c.key,
            })
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn links(&self, prefix: &str, out: &mut Vec<(String, BlockLink)>) {
        out.push((format!("{prefix}segments"), self.segment_link));
        for c in &self.columns {
            out.push((format!("{prefix}{}.data", c.name), c.data));
            out.push((format!("{prefix}{}.segments", c.name), c.segments));
        }
    }
}

impl TableMeta {
    /// Field names of the base table followed by each annex.
    fn schemas(&self) -> Vec<Vec<String>> {
        let mut out = vec![self.base.names()];
        out.extend(self.annexes.iter().map(|a| a.part.names()));
        out
    }

    /// Same structure, no rows.
    fn emptied(&self) -> Self {
        Self {
            flags: self.flags,
            segment_rows: self.segment_rows,
            base: PartMeta::new(&self.base.defs()),
            annexes: self
                .annexes
                .iter()
                .map(|a| AnnexMeta {
                    name: a.name.clone(),
                    part: PartMeta::new(&a.part.defs()),
                })
                .collect(),
        }
    }
}

/// Checks names, uniqueness and that key columns form a prefix.
fn validate_columns(defs: &[ColumnDef]) -> Result<(), TableError> {
    if defs.is_empty() {
        return Err(TableError::InvalidConfig("a table needs at least one column".into()));
    }
    for (i, d) in defs.iter().enumerate() {
        if d.name.is_empty() {
            return Err(TableError::InvalidConfig(format!("column {} has an empty name", i + 1)));
        }
        if d.name == GUIDE_COLUMN {
            return Err(TableError::InvalidConfig(format!("'{GUIDE_COLUMN}' is reserved")));
        }
        if defs[..i].iter().any(|o| o.name == d.name) {
            return Err(TableError::InvalidConfig(format!("duplicate column '{}'", d.name)));
        }
        if d.key && i > 0 && !defs[i - 1].key {
            return Err(TableError::InvalidConfig(format!(
                "key column '{}' follows a non-key column",
                d.name
            )));
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// GroupTable
// ------------------------------------------------------------------------------------------------

/// A handle on a group-table file.
pub struct GroupTable {
    mgr: HeaderManager,
    meta: TableMeta,
}

impl std::fmt::Debug for GroupTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTable")
            .field("path", &self.mgr.path())
            .field("rows", &self.meta.base.row_count)
            .field("segments", &self.meta.base.segment_count)
            .finish()
    }
}

impl GroupTable {
    /// Creates a new, empty table file. Fails if `path` exists.
    pub fn create(
        path: impl AsRef<Path>,
        columns: &[ColumnDef],
        config: &TableConfig,
    ) -> Result<Self, TableError> {
        config.validate()?;
        validate_columns(columns)?;
        let key_count = columns.iter().take_while(|c| c.key).count();
        if config.time_key && key_count == 0 {
            return Err(TableError::InvalidConfig(
                "a time key needs at least one key column".into(),
            ));
        }

        let meta = TableMeta {
            flags: TableFlags {
                compress: config.compress,
                time_key: config.time_key,
                delete_key: config.delete_key,
                check_pure: config.check_pure,
            },
            segment_rows: config.segment_rows,
            base: PartMeta::new(columns),
            annexes: Vec::new(),
        };
        let mut header = Header::new(normalize_block_size(config.block_size), config.enlarge_blocks);
        header.write_password_hash = config.write_password_hash.clone();
        header.read_password_hash = config.read_password_hash.clone();
        header.distribute = config.distribute.clone();
        Self::create_with(path.as_ref(), header, meta)
    }

    /// Creates a new, empty file with the structure, flags, distribution
    /// and password hashes of `other`.
    pub fn create_like(path: impl AsRef<Path>, other: &GroupTable) -> Result<Self, TableError> {
        let src = other.mgr.header();
        let mut header = Header::new(src.block_size, src.enlarge_blocks);
        header.write_password_hash = src.write_password_hash.clone();
        header.read_password_hash = src.read_password_hash.clone();
        header.distribute = src.distribute.clone();
        Self::create_with(path.as_ref(), header, other.meta.emptied())
    }

    fn create_with(path: &Path, mut header: Header, meta: TableMeta) -> Result<Self, TableError> {
        header.schemas = meta.schemas();
        header.metadata = encoding::encode_to_vec(&meta)?;
        let mgr = HeaderManager::create(path, header)?;
        info!(
            path = %path.display(),
            columns = meta.base.columns.len(),
            keys = meta.base.key_count(),
            "group table created"
        );
        Ok(Self { mgr, meta })
    }

    /// Opens an existing table file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let mgr = HeaderManager::open(path)?;
        let meta = decode_meta(mgr.header())?;
        debug!(
            path = %mgr.path().display(),
            rows = meta.base.row_count,
            segments = meta.base.segment_count,
            annexes = meta.annexes.len(),
            "group table opened"
        );
        Ok(Self { mgr, meta })
    }

    /// Re-reads the header after another handle committed changes.
    pub fn reload(&mut self) -> Result<(), TableError> {
        self.mgr.reload()?;
        self.meta = decode_meta(self.mgr.header())?;
        Ok(())
    }

    /// Deletes the table file, releasing every block it owns.
    pub fn delete(self) -> Result<(), TableError> {
        let lock = Arc::clone(self.mgr.lock());
        let _guard = lock
            .write()
            .map_err(|_| HeaderError::Internal("file lock poisoned".into()))?;
        let path = self.mgr.path().to_path_buf();
        drop(self);
        std::fs::remove_file(&path)?;
        info!(path = %path.display(), "group table deleted");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writing
    // --------------------------------------------------------------------------------------------

    /// Appends rows in key order as one or more new segments.
    ///
    /// The whole call is one transaction: on any error nothing is visible.
    pub fn append(&mut self, rows: &[Row]) -> Result<(), TableError> {
        if rows.is_empty() {
            return Ok(());
        }
        let segment_rows = self.meta.segment_rows as usize;
        let check_pure = self.meta.flags.check_pure;
        self.mutate(|txn, meta| append_part(txn, &mut meta.base, rows, segment_rows, check_pure))
    }

    /// Adds an empty annex named `name` with the given columns.
    pub fn attach(&mut self, name: &str, columns: &[ColumnDef]) -> Result<(), TableError> {
        if self.meta.flags.time_key {
            return Err(TableError::TimeKeyAnnex);
        }
        if name.is_empty() || self.meta.annexes.iter().any(|a| a.name == name) {
            return Err(TableError::InvalidConfig(format!("invalid or duplicate annex name '{name}'")));
        }
        validate_columns(columns)?;

        let mut defs = Vec::with_capacity(columns.len() + 1);
        defs.push(ColumnDef::key(GUIDE_COLUMN));
        defs.extend_from_slice(columns);
        let mut part = PartMeta::new(&defs);
        part.columns[0].kind = Some(ValueKind::Long);

        let name = name.to_string();
        self.mutate(|_, meta| {
            meta.annexes.push(AnnexMeta { name, part });
            Ok(())
        })
    }

    /// Handle on the annex named `name`.
    pub fn annex(&mut self, name: &str) -> Result<Annex<'_>, TableError> {
        let index = self.annex_index(name)?;
        Ok(Annex { table: self, index })
    }

    /// Removes an annex and releases its blocks once the change commits.
    pub fn delete_annex(&mut self, name: &str) -> Result<(), TableError> {
        let index = self.annex_index(name)?;
        let block_size = self.mgr.header().block_size;
        self.mutate(|txn, meta| {
            let removed = meta.annexes.remove(index);
            let mut links = Vec::new();
            removed.part.links("", &mut links);
            let (file, alloc) = txn.io();
            for (_, link) in links {
                let reader = BlockLinkReader::new(file, block_size, link)?;
                for pos in reader.block_positions() {
                    alloc.release(*pos);
                }
            }
            debug!(annex = %removed.name, "annex removed");
            Ok(())
        })
    }

    fn annex_index(&self, name: &str) -> Result<usize, TableError> {
        self.meta
            .annexes
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| TableError::UnknownAnnex(name.to_string()))
    }

    /// Runs `f` on a copy of the metadata inside one transaction and
    /// commits; the handle's metadata is replaced only on success.
    fn mutate<F>(&mut self, f: F) -> Result<(), TableError>
    where
        F: FnOnce(&mut Transaction<'_>, &mut TableMeta) -> Result<(), TableError>,
    {
        let mut meta = self.meta.clone();
        let mut txn = self.mgr.begin();
        f(&mut txn, &mut meta)?;
        txn.header_mut().schemas = meta.schemas();
        txn.header_mut().metadata = encoding::encode_to_vec(&meta)?;
        txn.commit()?;
        self.meta = meta;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        self.mgr.path()
    }

    pub fn header(&self) -> &Header {
        self.mgr.header()
    }

    pub fn columns(&self) -> Vec<ColumnDef> {
        self.meta.base.defs()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.meta.base.names()
    }

    pub fn key_columns(&self) -> Vec<String> {
        self.meta
            .base
            .columns
            .iter()
            .filter(|c| c.key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Kind recorded for `column` (first non-null value written).
    pub fn column_kind(&self, column: &str) -> Result<Option<ValueKind>, TableError> {
        let idx = self
            .meta
            .base
            .column_index(column)
            .ok_or_else(|| TableError::UnknownColumn(column.to_string()))?;
        Ok(self.meta.base.columns[idx].kind)
    }

    pub fn row_count(&self) -> u64 {
        self.meta.base.row_count
    }

    pub fn segment_count(&self) -> u32 {
        self.meta.base.segment_count
    }

    pub fn segment_rows(&self) -> u32 {
        self.meta.segment_rows
    }

    pub fn flags(&self) -> TableFlags {
        self.meta.flags
    }

    pub fn annex_names(&self) -> Vec<String> {
        self.meta.annexes.iter().map(|a| a.name.clone()).collect()
    }

    /// Segments of the base table, in row order.
    pub fn segments(&self) -> Result<Vec<SegmentInfo>, TableError> {
        Ok(self.snapshot()?.segments(None)?)
    }

    /// Every block chain of the file except the header chain, labelled by
    /// owner: `segments`, `<column>.data`, `<column>.segments`, and the
    /// same with an `<annex>/` prefix for annexes.
    pub fn block_link_info(&self) -> Vec<(String, BlockLink)> {
        let mut out = Vec::new();
        self.meta.base.links("", &mut out);
        for annex in &self.meta.annexes {
            annex.part.links(&format!("{}/", annex.name), &mut out);
        }
        out
    }

    // --------------------------------------------------------------------------------------------
    // Reading
    // --------------------------------------------------------------------------------------------

    /// Read-only view of the committed state.
    pub fn snapshot(&self) -> Result<TableSnapshot, TableError> {
        let source = self.mgr.file().map()?;
        Ok(TableSnapshot::new(
            Arc::new(source),
            Arc::new(self.meta.clone()),
            self.mgr.header().block_size,
        ))
    }

    /// Cursor over every row of the base table.
    pub fn cursor(&self) -> Result<TableCursor, TableError> {
        let snapshot = self.snapshot()?;
        let segments = snapshot.segment_count(None);
        TableCursor::new(snapshot, None, 0..segments)
    }

    /// `paths` cursors splitting the base table's segments into contiguous
    /// ranges. Paths beyond the segment count are empty.
    pub fn cursors(&self, paths: usize) -> Result<Vec<TableCursor>, TableError> {
        if paths == 0 {
            return Err(TableError::InvalidConfig("path count must be >= 1".into()));
        }
        let snapshot = self.snapshot()?;
        let segments = snapshot.segment_count(None);
        (0..paths)
            .map(|p| {
                let range = segments * p / paths..segments * (p + 1) / paths;
                TableCursor::new(snapshot.clone(), None, range)
            })
            .collect()
    }

    /// Forward-only key searcher over the base table.
    pub fn searcher(&self) -> Result<RecordSeqSearcher, TableError> {
        Ok(RecordSeqSearcher::new(self.snapshot()?)?)
    }
}

fn decode_meta(header: &Header) -> Result<TableMeta, TableError> {
    if header.metadata.is_empty() {
        return Err(TableError::Corrupt("file carries no table metadata".into()));
    }
    let (meta, consumed) = encoding::decode_from_slice::<TableMeta>(&header.metadata)?;
    if consumed != header.metadata.len() {
        return Err(TableError::Corrupt(format!(
            "{} trailing bytes after table metadata",
            header.metadata.len() - consumed
        )));
    }
    if meta.segment_rows == 0 {
        return Err(TableError::Corrupt("segment row count is zero".into()));
    }
    Ok(meta)
}

// ------------------------------------------------------------------------------------------------
// Append
// ------------------------------------------------------------------------------------------------

/// Validates `rows` against `part` and writes them as new segments.
fn append_part(
    txn: &mut Transaction<'_>,
    part: &mut PartMeta,
    rows: &[Row],
    segment_rows: usize,
    check_pure: bool,
) -> Result<(), TableError> {
    let width = part.columns.len();
    let key_count = part.key_count();

    let mut prev: Option<&[Value]> = (!part.last_key.is_empty()).then_some(&part.last_key[..]);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(TableError::RowWidth {
                expected: width,
                found: row.len(),
            });
        }
        let key = &row[..key_count];
        if let Some(prev) = prev {
            if value::compare_tuples(prev, key, key_count)? == Ordering::Greater {
                return Err(TableError::Unsorted {
                    row: part.row_count + i as u64 + 1,
                });
            }
        }
        prev = Some(key);
    }

    for (c, column) in part.columns.iter_mut().enumerate() {
        for row in rows {
            let found = row[c].kind();
            if found == ValueKind::Null {
                continue;
            }
            match column.kind {
                None => column.kind = Some(found),
                Some(expected) if check_pure && expected != found => {
                    return Err(TableError::ImpureColumn {
                        column: column.name.clone(),
                        expected,
                        found,
                    });
                }
                Some(_) => {}
            }
        }
    }

    for chunk in rows.chunks(segment_rows) {
        let (file, alloc) = txn.io();
        for (c, column) in part.columns.iter_mut().enumerate() {
            let mut bytes = Vec::new();
            for row in chunk {
                row[c].encode_to(&mut bytes)?;
            }
            let byte_len = u32::try_from(bytes.len()).map_err(|_| {
                EncodingError::LengthOverflow(format!(
                    "segment of column '{}' is {} bytes",
                    column.name,
                    bytes.len()
                ))
            })?;
            let position = BlockLinkWriter::new(file, alloc, &mut column.data).append(&bytes)?;
            let entry = SegmentEntry {
                position,
                byte_len,
                bounds: segment_bounds(chunk.iter().map(|r| &r[c])),
            };
            BlockLinkWriter::new(file, alloc, &mut column.segments)
                .append(&encoding::encode_to_vec(&entry)?)?;
        }

        let last_key = chunk
            .last()
            .map(|r| r[..key_count].to_vec())
            .unwrap_or_default();
        let record = SegmentRecord {
            rows: chunk.len() as u32,
            last_key: last_key.clone(),
        };
        BlockLinkWriter::new(file, alloc, &mut part.segment_link)
            .append(&encoding::encode_to_vec(&record)?)?;

        part.segment_count += 1;
        part.row_count += chunk.len() as u64;
        part.last_key = last_key;
        debug!(
            segment = part.segment_count,
            rows = chunk.len(),
            total_rows = part.row_count,
            "segment written"
        );
    }
    Ok(())
}

/// Min and max of a segment's values; `None` if two values are not
/// comparable.
fn segment_bounds<'a>(mut values: impl Iterator<Item = &'a Value>) -> Option<(Value, Value)> {
    let first = values.next()?;
    let (mut min, mut max) = (first, first);
    for v in values {
        if value::compare(v, min).ok()? == Ordering::Less {
            min = v;
        }
        if value::compare(v, max).ok()? == Ordering::Greater {
            max = v;
        }
    }
    Some((min.clone(), max.clone()))
}

// ------------------------------------------------------------------------------------------------
// Annex
// ------------------------------------------------------------------------------------------------

/// A named sub-table whose rows refer to base-table rows.
pub struct Annex<'a> {
    table: &'a mut GroupTable,
    index: usize,
}

impl Annex<'_> {
    fn part(&self) -> &PartMeta {
        &self.table.meta.annexes[self.index].part
    }

    pub fn name(&self) -> &str {
        &self.table.meta.annexes[self.index].name
    }

    /// Column names, starting with [`GUIDE_COLUMN`].
    pub fn columns(&self) -> Vec<String> {
        self.part().names()
    }

    pub fn row_count(&self) -> u64 {
        self.part().row_count
    }

    /// Appends `(guide, row)` pairs. Guides are 1-based base-table row
    /// numbers, non-decreasing across all appends.
    pub fn append(&mut self, rows: &[(u64, Row)]) -> Result<(), TableError> {
        if rows.is_empty() {
            return Ok(());
        }
        let base_rows = self.table.meta.base.row_count;
        let mut full = Vec::with_capacity(rows.len());
        for (guide, row) in rows {
            if *guide == 0 || *guide > base_rows {
                return Err(TableError::GuideOutOfRange {
                    guide: *guide,
                    rows: base_rows,
                });
            }
            let guide = i64::try_from(*guide).map_err(|_| TableError::GuideOutOfRange {
                guide: *guide,
                rows: base_rows,
            })?;
            let mut r = Vec::with_capacity(row.len() + 1);
            r.push(Value::Long(guide));
            r.extend(row.iter().cloned());
            full.push(r);
        }

        let index = self.index;
        let segment_rows = self.table.meta.segment_rows as usize;
        let check_pure = self.table.meta.flags.check_pure;
        self.table.mutate(|txn, meta| {
            append_part(txn, &mut meta.annexes[index].part, &full, segment_rows, check_pure)
        })
    }

    /// Cursor over every annex row (guide column first).
    pub fn cursor(&self) -> Result<TableCursor, TableError> {
        let snapshot = self.table.snapshot()?;
        let segments = snapshot.segment_count(Some(self.index));
        TableCursor::new(snapshot, Some(self.index), 0..segments)
    }
}
