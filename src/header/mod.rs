//! # Header and transaction manager
//!
//! The header is the single point of truth for a group-table file: block
//! size, root chain, allocator state, optional password hashes and
//! distribution text, the schema list and the opaque table metadata.
//!
//! ## On-disk layout
//!
//! ```text
//! prologue (bytes 0..32 of block 0):
//! [magic "GRPTBL" 6B][marker 'C' 1B][block_size u32][root BlockLink 18B][pad 3B]
//!
//! header payload (stored in the root chain):
//! [magic 6B][marker 1B][block_size u32][root BlockLink 18B]
//! [reserve 32B, reserve[0] = version]
//! [free_pos Long40][file_size Long40]
//! [v>=1: write_password Option<String>][v>=1: read_password Option<String>]
//! [v>=2: distribute Option<String>]
//! [schemas: u32 count, each a Vec<String>]
//! [v>=4: enlarge_blocks u32][v>=4: free blocks u32 count + Long40 each]
//! [v>=4: table metadata Vec<u8>]
//! [crc32 u32 over everything above]
//! ```
//!
//! ## Commit protocol
//!
//! Structural changes run inside a [`Transaction`]:
//!
//! ```text
//! Idle -> begin -> Mutating -> commit -> Committing -> Idle
//!                      \-> abort / drop -> Idle (state restored)
//! ```
//!
//! `commit` holds the file's write lock while it
//!
//! 1. encodes the payload into a **new** chain of fresh blocks and fsyncs,
//! 2. overwrites the 32-byte prologue to point at the new chain,
//! 3. fsyncs again.
//!
//! The previous header chain is never touched before step 2, so a crash
//! at any earlier point leaves the file readable with the previous
//! header.  Its blocks are returned to the free list only after step 3.
//!
//! ## Synchronisation
//!
//! Every handle on the same physical file shares one
//! [`ShardedLock`] obtained from [`file_lock`].  Header reads take the
//! read side, header rewrites the write side, so no reader ever sees a
//! half-written prologue.

mod encoding_impls;

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock, Mutex, Weak},
};

use crc32fast::Hasher as Crc32;
use crossbeam::sync::ShardedLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::block::{
    Allocator, BLOCK_LINK_SIZE, BlockError, BlockFile, BlockLink, BlockLinkReader, BlockSource,
    payload_size,
};
use crate::encoding::{self, EncodingError, Long40};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic tag at the start of the file and of the header payload.
pub const MAGIC: [u8; 6] = *b"GRPTBL";

/// Format marker of a column-oriented group table.
pub const MARKER_COLUMN: u8 = b'C';

/// Format marker of a row-oriented group table (not supported).
pub const MARKER_ROW: u8 = b'R';

/// Size of the fixed prologue at offset 0.
pub const PROLOGUE_SIZE: usize = 32;

/// Version written by this crate.
pub const CURRENT_VERSION: u8 = 4;

/// Oldest version this crate reads or writes.
pub const MIN_VERSION: u8 = 4;

/// Byte offset of `reserve[0]` inside the header payload.
const VERSION_OFFSET: usize = MAGIC.len() + 1 + 4 + BLOCK_LINK_SIZE;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HeaderError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Block-level error (including corrupt chains).
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Encoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The magic tag does not identify a group-table file.
    #[error("not a group-table file (bad magic)")]
    BadMagic,

    /// The format marker names a store this crate cannot read.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The file was written by a newer version.
    #[error("unsupported version {found} (newest known is {current})")]
    UnsupportedVersion { found: u8, current: u8 },

    /// The file predates the oldest supported version.
    #[error("old version {found} (minimum is {min})")]
    OldVersion { found: u8, min: u8 },

    /// Header payload checksum mismatch.
    #[error("header checksum mismatch")]
    ChecksumMismatch,

    /// Prologue and payload disagree.
    #[error("corrupt header: {0}")]
    Corrupt(String),

    /// Unexpected internal state (e.g. poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Prologue
// ------------------------------------------------------------------------------------------------

/// The fixed 32-byte record at offset 0 locating the header chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prologue {
    pub marker: u8,
    pub block_size: u32,
    pub root: BlockLink,
}

impl Prologue {
    /// Parses and validates a prologue.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        check_magic_and_marker(bytes)?;
        let (prologue, _) = encoding::decode_from_slice::<Prologue>(bytes)?;
        Ok(prologue)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        Ok(encoding::encode_to_vec(self)?)
    }
}

fn check_magic_and_marker(bytes: &[u8]) -> Result<(), HeaderError> {
    if bytes.len() < MAGIC.len() + 1 || bytes[..MAGIC.len()] != MAGIC {
        return Err(HeaderError::BadMagic);
    }
    match bytes[MAGIC.len()].to_ascii_uppercase() {
        MARKER_COLUMN => Ok(()),
        MARKER_ROW => Err(HeaderError::UnsupportedFormat(
            "row-oriented group table".into(),
        )),
        other => Err(HeaderError::UnsupportedFormat(format!(
            "unknown format marker 0x{other:02X}"
        ))),
    }
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// The versioned header payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub marker: u8,
    pub block_size: u32,
    pub root: BlockLink,
    /// Reserved bytes; `reserve[0]` is the format version.
    pub reserve: [u8; 32],
    pub free_pos: u64,
    pub file_size: u64,
    pub write_password_hash: Option<String>,
    pub read_password_hash: Option<String>,
    pub distribute: Option<String>,
    /// Field names of every record structure stored in the file.
    pub schemas: Vec<Vec<String>>,
    pub enlarge_blocks: u32,
    pub free_blocks: Vec<u64>,
    /// Table metadata, encoded by the table layer.
    pub metadata: Vec<u8>,
}

impl Header {
    /// A current-version header for a fresh file.
    pub fn new(block_size: u32, enlarge_blocks: u32) -> Self {
        let mut reserve = [0u8; 32];
        reserve[0] = CURRENT_VERSION;
        Self {
            marker: MARKER_COLUMN,
            block_size,
            root: BlockLink::default(),
            reserve,
            free_pos: u64::from(block_size),
            file_size: u64::from(block_size),
            write_password_hash: None,
            read_password_hash: None,
            distribute: None,
            schemas: Vec::new(),
            enlarge_blocks,
            free_blocks: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn version(&self) -> u8 {
        self.reserve[0]
    }

    /// Encodes the payload followed by its CRC32.
    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let mut bytes = encoding::encode_to_vec(self)?;
        let mut hasher = Crc32::new();
        hasher.update(&bytes);
        bytes.extend_from_slice(&hasher.finalize().to_le_bytes());
        Ok(bytes)
    }

    /// Verifies the checksum and decodes a payload.
    ///
    /// Versions newer than [`CURRENT_VERSION`] are rejected before any
    /// version-gated field is parsed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        check_magic_and_marker(bytes)?;
        if bytes.len() < VERSION_OFFSET + 1 + 4 {
            return Err(HeaderError::Corrupt(format!(
                "header payload too short ({} bytes)",
                bytes.len()
            )));
        }
        let found = bytes[VERSION_OFFSET];
        if found > CURRENT_VERSION {
            return Err(HeaderError::UnsupportedVersion {
                found,
                current: CURRENT_VERSION,
            });
        }

        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(HeaderError::ChecksumMismatch);
        }

        let (header, consumed) = encoding::decode_from_slice::<Header>(body)?;
        if consumed != body.len() {
            return Err(HeaderError::Corrupt(format!(
                "{} trailing bytes after header payload",
                body.len() - consumed
            )));
        }
        Ok(header)
    }
}

// ------------------------------------------------------------------------------------------------
// Per-file lock registry
// ------------------------------------------------------------------------------------------------

type LockRegistry = Mutex<HashMap<PathBuf, Weak<ShardedLock<()>>>>;

static FILE_LOCKS: LazyLock<LockRegistry> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the synchronisation object shared by every handle on the
/// physical file at `path` (keyed by canonical path).
pub fn file_lock(path: impl AsRef<Path>) -> Result<Arc<ShardedLock<()>>, HeaderError> {
    let key = path.as_ref().canonicalize()?;
    let mut map = FILE_LOCKS
        .lock()
        .map_err(|_| HeaderError::Internal("file lock registry poisoned".into()))?;
    map.retain(|_, weak| weak.strong_count() > 0);
    if let Some(lock) = map.get(&key).and_then(Weak::upgrade) {
        return Ok(lock);
    }
    let lock = Arc::new(ShardedLock::new(()));
    map.insert(key, Arc::downgrade(&lock));
    Ok(lock)
}

fn poisoned<T>(_: T) -> HeaderError {
    HeaderError::Internal("file lock poisoned".into())
}

// ------------------------------------------------------------------------------------------------
// HeaderManager
// ------------------------------------------------------------------------------------------------

/// Owns the backing file, the in-memory header and the block allocator.
#[derive(Debug)]
pub struct HeaderManager {
    file: BlockFile,
    header: Header,
    alloc: Allocator,
    lock: Arc<ShardedLock<()>>,
}

impl HeaderManager {
    /// Creates a new file and commits `header` as its first header.
    ///
    /// On failure the partially written file is removed (best effort).
    pub fn create(path: impl AsRef<Path>, header: Header) -> Result<Self, HeaderError> {
        let path = path.as_ref();
        let file = BlockFile::create(path)?;

        let result = Self::init(file, header);
        if result.is_err() {
            if let Err(e) = std::fs::remove_file(path) {
                error!(path = %path.display(), error = %e, "failed to remove partially created file");
            }
        }
        result
    }

    fn init(file: BlockFile, header: Header) -> Result<Self, HeaderError> {
        file.set_len(u64::from(header.block_size))?;
        let lock = file_lock(file.path())?;
        let alloc = Allocator::new(header.block_size, header.enlarge_blocks);
        let mut mgr = Self {
            file,
            header,
            alloc,
            lock,
        };
        mgr.begin().commit()?;
        info!(
            path = %mgr.file.path().display(),
            block_size = mgr.header.block_size,
            "group table file created"
        );
        Ok(mgr)
    }

    /// Opens an existing file and loads its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HeaderError> {
        let file = BlockFile::open(path)?;
        let lock = file_lock(file.path())?;
        let header = {
            let _guard = lock.read().map_err(poisoned)?;
            read_header(&file)?
        };
        let alloc = allocator_for(&header);
        info!(
            path = %file.path().display(),
            version = header.version(),
            block_size = header.block_size,
            "group table file opened"
        );
        Ok(Self {
            file,
            header,
            alloc,
            lock,
        })
    }

    /// Re-reads the header written by another handle on the same file.
    pub fn reload(&mut self) -> Result<(), HeaderError> {
        let header = {
            let _guard = self.lock.read().map_err(poisoned)?;
            read_header(&self.file)?
        };
        self.alloc = allocator_for(&header);
        self.header = header;
        debug!(path = %self.file.path().display(), "header reloaded");
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn file(&self) -> &BlockFile {
        &self.file
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    /// The shared synchronisation object of this file.
    pub fn lock(&self) -> &Arc<ShardedLock<()>> {
        &self.lock
    }

    /// Starts a transaction; the current state is snapshotted so that an
    /// abort restores it exactly.
    /// Encoded header length after syncing its free list with the
    /// allocator.
    fn header_len(&mut self) -> Result<usize, HeaderError> {
        self.header.free_blocks = self.alloc.persisted_free_blocks();
        Ok(self.header.to_bytes()?.len())
    }

    pub fn begin(&mut self) -> Transaction<'_> {
        let saved = (self.header.clone(), self.alloc.clone());
        Transaction {
            mgr: self,
            saved: Some(saved),
            state: TxnState::Mutating,
        }
    }
}

fn allocator_for(header: &Header) -> Allocator {
    Allocator::restore(
        header.block_size,
        header.enlarge_blocks,
        header.free_pos,
        header.file_size,
        header.free_blocks.clone(),
    )
}

/// Reads the prologue, follows the root chain and decodes the payload.
fn read_header<S: BlockSource + ?Sized>(source: &S) -> Result<Header, HeaderError> {
    let mut raw = [0u8; PROLOGUE_SIZE];
    source.read_at(0, &mut raw)?;
    let prologue = Prologue::from_bytes(&raw)?;

    let reader = BlockLinkReader::new(source, prologue.block_size, prologue.root)?;
    let header = Header::from_bytes(&reader.read_all()?)?;

    if header.version() < MIN_VERSION {
        return Err(HeaderError::OldVersion {
            found: header.version(),
            min: MIN_VERSION,
        });
    }
    if header.block_size != prologue.block_size || header.root != prologue.root {
        return Err(HeaderError::Corrupt(
            "prologue does not match header payload".into(),
        ));
    }
    Ok(header)
}

// ------------------------------------------------------------------------------------------------
// Transaction
// ------------------------------------------------------------------------------------------------

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    Mutating,
    Committing,
}

/// A structural mutation of the file.
///
/// Dropping a transaction without committing aborts it: header and
/// allocator are restored to their state at [`HeaderManager::begin`].
/// Blocks written in the meantime are unreachable and get reused.
pub struct Transaction<'a> {
    mgr: &'a mut HeaderManager,
    saved: Option<(Header, Allocator)>,
    state: TxnState,
}

impl Transaction<'_> {
    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn header(&self) -> &Header {
        &self.mgr.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.mgr.header
    }

    /// Backing file and allocator for writing block chains.
    pub fn io(&mut self) -> (&BlockFile, &mut Allocator) {
        (&self.mgr.file, &mut self.mgr.alloc)
    }

    /// Durably publishes the mutated header.
    pub fn commit(mut self) -> Result<(), HeaderError> {
        self.state = TxnState::Committing;
        let version = self.mgr.header.version();
        if version < MIN_VERSION {
            return Err(HeaderError::OldVersion {
                found: version,
                min: MIN_VERSION,
            });
        }

        let lock = Arc::clone(&self.mgr.lock);
        let _guard = lock.write().map_err(poisoned)?;

        let old_root = self.mgr.header.root;
        let old_blocks = if old_root.is_empty() {
            Vec::new()
        } else {
            let reader = BlockLinkReader::new(&self.mgr.file, self.mgr.header.block_size, old_root)?;
            reader.block_positions().to_vec()
        };

        let root = self.write_shadow()?;
        if let Err(e) = self.publish(root) {
            error!(
                path = %self.mgr.file.path().display(),
                error = %e,
                "header publish failed, keeping the new header"
            );
            return Err(e);
        }

        for pos in old_blocks {
            self.mgr.alloc.release_now(pos);
        }
        self.mgr.alloc.promote_pending();
        self.saved = None;
        self.state = TxnState::Idle;

        debug!(
            path = %self.mgr.file.path().display(),
            root = root.first,
            blocks = root.block_count,
            free_pos = self.mgr.header.free_pos,
            "header committed"
        );
        Ok(())
    }

    /// Aborts explicitly; equivalent to dropping the transaction.
    pub fn abort(self) {}

    // --------------------------------------------------------------------------------------------
    // Commit stages (tests stop between them to simulate a crash)
    // --------------------------------------------------------------------------------------------

    /// Step 1: writes the payload into a chain of fresh blocks and fsyncs.
    /// Returns the new root descriptor; the prologue is untouched.
    pub(crate) fn write_shadow(&mut self) -> Result<BlockLink, HeaderError> {
        let mgr = &mut *self.mgr;
        let block_size = mgr.header.block_size;
        let payload = payload_size(block_size);

        // Reusable blocks are unreferenced by the durable header, so the
        // shadow chain may live in them. Each one taken shrinks the encoded
        // free list; a take that would leave a block unused is undone and
        // the block is grown instead.
        let mut positions: Vec<u64> = Vec::new();
        let len = loop {
            let len = mgr.header_len()?;
            let count = len.div_ceil(payload).max(1);
            if positions.len() >= count {
                break len;
            }
            let pos = match mgr.alloc.take_free() {
                Some(pos) => {
                    let shrunk = mgr.header_len()?.div_ceil(payload).max(1);
                    if shrunk > positions.len() {
                        pos
                    } else {
                        mgr.alloc.release_now(pos);
                        mgr.alloc.allocate_fresh(&mgr.file)?
                    }
                }
                None => mgr.alloc.allocate_fresh(&mgr.file)?,
            };
            positions.push(pos);
        };
        let count = positions.len();
        let root = BlockLink {
            first: positions[0],
            last: positions[count - 1],
            free_index: (len - (count - 1) * payload) as u32,
            block_count: count as u32,
        };

        mgr.header.root = root;
        mgr.header.free_pos = mgr.alloc.free_pos();
        mgr.header.file_size = mgr.alloc.file_size();
        let bytes = mgr.header.to_bytes()?;
        if bytes.len() != len {
            return Err(HeaderError::Internal(format!(
                "header length changed while sizing shadow chain ({len} -> {})",
                bytes.len()
            )));
        }

        for (k, pos) in positions.iter().enumerate() {
            let chunk = &bytes[k * payload..len.min((k + 1) * payload)];
            mgr.file.write_at(*pos, chunk)?;
            let next = positions.get(k + 1).copied().unwrap_or(0);
            let ptr = encoding::encode_to_vec(&Long40(next))?;
            mgr.file.write_at(pos + payload as u64, &ptr)?;
        }
        mgr.file.sync()?;
        Ok(root)
    }

    /// Steps 2 and 3: overwrites the prologue and fsyncs.
    pub(crate) fn publish(&mut self, root: BlockLink) -> Result<(), HeaderError> {
        self.write_prologue(root)?;
        self.mgr.file.sync()?;
        Ok(())
    }

    /// Step 2 alone. Once the write is issued the durable root may already
    /// be the shadow chain, so the in-memory header is no longer rolled
    /// back; a failure from here on leaves the new header current.
    pub(crate) fn write_prologue(&mut self, root: BlockLink) -> Result<(), HeaderError> {
        let prologue = Prologue {
            marker: self.mgr.header.marker,
            block_size: self.mgr.header.block_size,
            root,
        }
        .to_bytes()?;
        self.saved = None;
        self.mgr.file.write_at(0, &prologue)?;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some((header, alloc)) = self.saved.take() {
            warn!(
                path = %self.mgr.file.path().display(),
                state = ?self.state,
                "transaction aborted, header state restored"
            );
            self.mgr.header = header;
            self.mgr.alloc = alloc;
        }
    }
}
