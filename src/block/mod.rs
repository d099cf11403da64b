//! # Block Store
//!
//! A group-table file is a sequence of fixed-size **blocks**.  Callers
//! never address blocks individually; every logical byte stream (the
//! header payload, one column's data, one column's segment statistics)
//! lives in a [`BlockLink`]: a singly linked chain of blocks read and
//! written as one contiguous stream.
//!
//! ## On-disk layout
//!
//! ```text
//! offset 0              block_size            2*block_size
//! +---------------------+---------------------+---------------------+---
//! | prologue (32 bytes) | block               | block               | …
//! | + unused            | [payload][next: 5B] | [payload][next: 5B] |
//! +---------------------+---------------------+---------------------+---
//! ```
//!
//! - Block 0 is reserved for the file prologue; allocation starts at
//!   `block_size`, so a next-pointer of `0` terminates a chain.
//! - Each block carries `block_size - 5` payload bytes followed by the
//!   [`Long40`](crate::encoding::Long40) offset of the next block.
//!
//! ## Allocation
//!
//! [`Allocator`] hands out blocks from an in-memory free list first and
//! otherwise bumps the free pointer, growing the file by
//! `enlarge_blocks * block_size` bytes whenever it runs out of room.
//! Blocks released during a transaction stay *pending* until the header
//! that no longer references them is durable; only then are they moved
//! to the reusable free list.
//!
//! ## Sources
//!
//! Readers work against the [`BlockSource`] trait, implemented by the
//! writable [`BlockFile`] and by read-only memory-mapped snapshots
//! ([`MmapSource`]).

mod encoding_impls;
mod link;

#[cfg(test)]
mod tests;

pub use link::{
    BLOCK_LINK_SIZE, BlockLink, BlockLinkReader, BlockLinkWriter, LinkIndex, payload_size,
};

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::encoding::EncodingError;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Bytes at the tail of every block holding the next-block pointer.
pub const NEXT_POINTER_SIZE: usize = 5;

/// Smallest legal block size.  Block sizes are multiples of this value.
pub const MIN_BLOCK_SIZE: u32 = 4096;

/// Largest block size that is still a multiple of [`MIN_BLOCK_SIZE`].
pub const MAX_BLOCK_SIZE: u32 = u32::MAX & !(MIN_BLOCK_SIZE - 1);

/// Rounds `size` up to a multiple of [`MIN_BLOCK_SIZE`], clamped to
/// `MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE`.
pub fn normalize_block_size(size: u32) -> u32 {
    let size = size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
    size.div_ceil(MIN_BLOCK_SIZE) * MIN_BLOCK_SIZE
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors raised by block I/O and block-chain traversal.
#[derive(Debug, Error)]
pub enum BlockError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding error while reading a descriptor or pointer.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A chain or offset violates the block layout.
    #[error("Corrupt block chain: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Block sources
// ------------------------------------------------------------------------------------------------

/// Random-access, read-only view of a block file.
pub trait BlockSource {
    /// Fills `buf` with the bytes starting at absolute offset `pos`.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Current length of the source in bytes.
    fn size(&self) -> Result<u64, BlockError>;
}

/// The writable backing file of a group table.
///
/// All I/O is positioned (`pread`/`pwrite`), so a shared reference is
/// enough to read and write; ordering between writers is the caller's
/// job (see [`crate::header`]).
#[derive(Debug)]
pub struct BlockFile {
    file: File,
    path: PathBuf,
}

impl BlockFile {
    /// Creates a new file, failing if `path` already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BlockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self { file, path })
    }

    /// Opens an existing file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `data` at absolute offset `pos`.
    pub fn write_at(&self, pos: u64, data: &[u8]) -> Result<(), BlockError> {
        self.file.write_all_at(data, pos)?;
        Ok(())
    }

    /// Resizes the file to exactly `len` bytes.
    pub fn set_len(&self, len: u64) -> Result<(), BlockError> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Durability barrier: flushes data and metadata to stable storage.
    pub fn sync(&self) -> Result<(), BlockError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Maps the current file contents read-only.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because:
    ///
    /// - blocks reachable from a committed header are never rewritten
    ///   while that header is current,
    /// - the mapping is read-only,
    /// - every read is bounds-checked against the mapped length.
    pub fn map(&self) -> Result<MmapSource, BlockError> {
        let map = unsafe { Mmap::map(&self.file)? };
        Ok(MmapSource { map })
    }
}

impl BlockSource for BlockFile {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        self.file.read_exact_at(buf, pos).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                BlockError::Corrupt(format!(
                    "read of {} bytes at offset {pos} runs past end of file",
                    buf.len()
                ))
            } else {
                BlockError::Io(e)
            }
        })
    }

    fn size(&self) -> Result<u64, BlockError> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read-only memory map of a block file.
#[derive(Debug)]
pub struct MmapSource {
    map: Mmap,
}

impl BlockSource for MmapSource {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let start = usize::try_from(pos)
            .map_err(|_| BlockError::Corrupt(format!("offset {pos} out of address range")))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.map.len())
            .ok_or_else(|| {
                BlockError::Corrupt(format!(
                    "read of {} bytes at offset {pos} beyond mapped length {}",
                    buf.len(),
                    self.map.len()
                ))
            })?;
        buf.copy_from_slice(&self.map[start..end]);
        Ok(())
    }

    fn size(&self) -> Result<u64, BlockError> {
        Ok(self.map.len() as u64)
    }
}

// ------------------------------------------------------------------------------------------------
// Allocator
// ------------------------------------------------------------------------------------------------

/// Block allocator state persisted in the header.
///
/// `Clone` is cheap enough to snapshot the allocator at transaction
/// begin and restore it on abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocator {
    block_size: u64,
    enlarge_blocks: u64,
    free_pos: u64,
    file_size: u64,
    free_blocks: Vec<u64>,
    pending: Vec<u64>,
}

impl Allocator {
    /// Allocator for a fresh file: only the prologue block exists.
    pub fn new(block_size: u32, enlarge_blocks: u32) -> Self {
        let block_size = u64::from(block_size);
        Self {
            block_size,
            enlarge_blocks: u64::from(enlarge_blocks.max(1)),
            free_pos: block_size,
            file_size: block_size,
            free_blocks: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Allocator restored from persisted header fields.
    pub fn restore(
        block_size: u32,
        enlarge_blocks: u32,
        free_pos: u64,
        file_size: u64,
        free_blocks: Vec<u64>,
    ) -> Self {
        Self {
            free_pos,
            file_size,
            free_blocks,
            ..Self::new(block_size, enlarge_blocks)
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size as u32
    }

    pub fn enlarge_blocks(&self) -> u32 {
        self.enlarge_blocks as u32
    }

    /// Offset one past the last block ever handed out.
    pub fn free_pos(&self) -> u64 {
        self.free_pos
    }

    /// File length the allocator has grown the file to.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Blocks that will be free once the current transaction commits:
    /// the reusable list plus the pending releases.
    pub fn persisted_free_blocks(&self) -> Vec<u64> {
        let mut all = self.free_blocks.clone();
        all.extend_from_slice(&self.pending);
        all
    }

    /// Returns a zeroed-trailer block, preferring the free list.
    pub fn allocate(&mut self, file: &BlockFile) -> Result<u64, BlockError> {
        let pos = match self.free_blocks.pop() {
            Some(pos) => pos,
            None => return self.allocate_fresh(file),
        };
        self.clear_next(file, pos)?;
        Ok(pos)
    }

    /// Pops an immediately reusable block without touching the file.
    /// Pending releases are never returned.
    pub fn take_free(&mut self) -> Option<u64> {
        self.free_blocks.pop()
    }

    /// Returns a block past the free pointer, never one from the free
    /// list.
    pub fn allocate_fresh(&mut self, file: &BlockFile) -> Result<u64, BlockError> {
        if self.free_pos + self.block_size > self.file_size {
            let new_size = self.file_size + self.block_size * self.enlarge_blocks;
            file.set_len(new_size)?;
            debug!(
                path = %file.path().display(),
                old_size = self.file_size,
                new_size,
                "file enlarged"
            );
            self.file_size = new_size;
        }
        let pos = self.free_pos;
        self.free_pos += self.block_size;
        self.clear_next(file, pos)?;
        Ok(pos)
    }

    /// Marks `pos` free after the next successful commit.
    pub fn release(&mut self, pos: u64) {
        self.pending.push(pos);
    }

    /// Marks `pos` immediately reusable.  Only for blocks no durable
    /// header references.
    pub fn release_now(&mut self, pos: u64) {
        self.free_blocks.push(pos);
    }

    /// Moves pending releases to the free list; called once the header
    /// that dropped them is durable.
    pub fn promote_pending(&mut self) {
        self.free_blocks.append(&mut self.pending);
    }

    /// Number of immediately reusable blocks.
    pub fn free_count(&self) -> usize {
        self.free_blocks.len()
    }

    fn clear_next(&self, file: &BlockFile, pos: u64) -> Result<(), BlockError> {
        let trailer = pos + self.block_size - NEXT_POINTER_SIZE as u64;
        file.write_at(trailer, &[0u8; NEXT_POINTER_SIZE])
    }
}
