//! Immutable, memory-mapped views of a committed table.

use std::sync::Arc;

use crate::block::{BlockError, LinkIndex, MmapSource};
use crate::cursor::CursorError;
use crate::encoding::{Decode, decode_n};
use crate::value::Value;

use super::{PartMeta, SegmentEntry, SegmentInfo, SegmentRecord, TableFlags, TableMeta};

/// A read-only view of a table as of the moment it was taken.
///
/// Cloning is cheap; every clone shares the same mapping. Rows appended
/// after the snapshot was taken are not visible through it.
#[derive(Clone)]
pub struct TableSnapshot {
    source: Arc<MmapSource>,
    meta: Arc<TableMeta>,
    block_size: u32,
}

impl std::fmt::Debug for TableSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSnapshot")
            .field("rows", &self.meta.base.row_count)
            .field("segments", &self.meta.base.segment_count)
            .finish()
    }
}

/// Data chain and per-segment entries of one column.
#[derive(Debug, Clone)]
pub(crate) struct ColumnData {
    index: LinkIndex,
    entries: Vec<SegmentEntry>,
}

impl ColumnData {
    pub fn entry(&self, segment: usize) -> Result<&SegmentEntry, CursorError> {
        self.entries.get(segment).ok_or_else(|| {
            BlockError::Corrupt(format!("column has no statistics for segment {segment}")).into()
        })
    }
}

impl TableSnapshot {
    pub(crate) fn new(source: Arc<MmapSource>, meta: Arc<TableMeta>, block_size: u32) -> Self {
        Self {
            source,
            meta,
            block_size,
        }
    }

    /// The base table (`None`) or the annex at `annex`.
    pub(crate) fn part(&self, annex: Option<usize>) -> &PartMeta {
        match annex.and_then(|i| self.meta.annexes.get(i)) {
            Some(a) => &a.part,
            None => &self.meta.base,
        }
    }

    pub fn flags(&self) -> TableFlags {
        self.meta.flags
    }

    pub fn row_count(&self) -> u64 {
        self.meta.base.row_count
    }

    pub(crate) fn segment_count(&self, annex: Option<usize>) -> usize {
        self.part(annex).segment_count as usize
    }

    /// Row counts and last keys of every segment.
    pub(crate) fn segment_records(
        &self,
        annex: Option<usize>,
    ) -> Result<Vec<SegmentRecord>, CursorError> {
        let part = self.part(annex);
        let index = LinkIndex::new(&*self.source, self.block_size, part.segment_link)?;
        decode_all(&index, &self.source, part.segment_count as usize)
    }

    pub(crate) fn segments(&self, annex: Option<usize>) -> Result<Vec<SegmentInfo>, CursorError> {
        let mut first_row = 1u64;
        Ok(self
            .segment_records(annex)?
            .into_iter()
            .map(|r| {
                let info = SegmentInfo {
                    first_row,
                    rows: r.rows,
                    last_key: r.last_key,
                };
                first_row += u64::from(r.rows);
                info
            })
            .collect())
    }

    /// Opens the chains of column `column` of a part.
    pub(crate) fn column(
        &self,
        annex: Option<usize>,
        column: usize,
    ) -> Result<ColumnData, CursorError> {
        let part = self.part(annex);
        let meta = part.columns.get(column).ok_or_else(|| {
            CursorError::Config(format!("column index {column} out of range"))
        })?;
        let stats = LinkIndex::new(&*self.source, self.block_size, meta.segments)?;
        let entries = decode_all(&stats, &self.source, part.segment_count as usize)?;
        let index = LinkIndex::new(&*self.source, self.block_size, meta.data)?;
        Ok(ColumnData { index, entries })
    }

    /// Loads the `rows` values of one column segment.
    pub(crate) fn load(
        &self,
        column: &ColumnData,
        segment: usize,
        rows: usize,
    ) -> Result<Vec<Value>, CursorError> {
        let entry = column.entry(segment)?;
        let bytes = column
            .index
            .read(&*self.source, entry.position, entry.byte_len as usize)?;
        let (values, consumed) = decode_n::<Value>(&bytes, rows)?;
        if consumed != bytes.len() {
            return Err(BlockError::Corrupt(format!(
                "segment {segment} holds {} bytes, {rows} values use {consumed}",
                bytes.len()
            ))
            .into());
        }
        Ok(values)
    }
}

/// Decodes exactly `count` records filling the whole chain.
fn decode_all<T: Decode>(
    index: &LinkIndex,
    source: &MmapSource,
    count: usize,
) -> Result<Vec<T>, CursorError> {
    let bytes = index.read(source, 0, index.len() as usize)?;
    let (items, consumed) = decode_n::<T>(&bytes, count)?;
    if consumed != bytes.len() {
        return Err(BlockError::Corrupt(format!(
            "chain holds {} bytes after {count} records",
            bytes.len() - consumed
        ))
        .into());
    }
    Ok(items)
}
