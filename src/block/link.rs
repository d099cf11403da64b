//! Block chains: descriptor, appender and reader.

use tracing::trace;

use super::{Allocator, BlockError, BlockFile, BlockSource, NEXT_POINTER_SIZE};
use crate::encoding::{self, Decode, Long40};

// ------------------------------------------------------------------------------------------------
// BlockLink descriptor
// ------------------------------------------------------------------------------------------------

/// Encoded size of a [`BlockLink`]: two `Long40` offsets and two `u32`s.
pub const BLOCK_LINK_SIZE: usize = 18;

/// Descriptor of one chain of blocks.
///
/// Invariants:
/// - following next-pointers from `first` visits exactly `block_count`
///   blocks and ends at `last`;
/// - `free_index` (bytes used in `last`) never exceeds the block payload.
///
/// An empty chain has every field set to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockLink {
    pub first: u64,
    pub last: u64,
    pub free_index: u32,
    pub block_count: u32,
}

impl BlockLink {
    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Logical length in bytes of the stream this chain holds.
    pub fn len(&self, block_size: u32) -> u64 {
        if self.block_count == 0 {
            return 0;
        }
        let payload = payload_size(block_size) as u64;
        u64::from(self.block_count - 1) * payload + u64::from(self.free_index)
    }
}

/// Payload bytes carried by one block.
pub fn payload_size(block_size: u32) -> usize {
    block_size as usize - NEXT_POINTER_SIZE
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends bytes to a chain, linking new blocks as the last one fills.
///
/// The descriptor is updated in place; persisting it is the job of the
/// transaction that owns the allocator.
pub struct BlockLinkWriter<'a> {
    file: &'a BlockFile,
    alloc: &'a mut Allocator,
    link: &'a mut BlockLink,
}

impl<'a> BlockLinkWriter<'a> {
    pub fn new(file: &'a BlockFile, alloc: &'a mut Allocator, link: &'a mut BlockLink) -> Self {
        Self { file, alloc, link }
    }

    /// Appends `data` and returns the logical offset it starts at.
    pub fn append(&mut self, data: &[u8]) -> Result<u64, BlockError> {
        let block_size = self.alloc.block_size();
        let start = self.link.len(block_size);
        if data.is_empty() {
            return Ok(start);
        }

        if self.link.block_count == 0 {
            let pos = self.alloc.allocate(self.file)?;
            *self.link = BlockLink {
                first: pos,
                last: pos,
                free_index: 0,
                block_count: 1,
            };
        }

        let payload = payload_size(block_size);
        let mut rest = data;
        while !rest.is_empty() {
            if self.link.free_index as usize == payload {
                self.link_new_block(payload)?;
            }
            let used = self.link.free_index as usize;
            let n = (payload - used).min(rest.len());
            self.file
                .write_at(self.link.last + used as u64, &rest[..n])?;
            self.link.free_index += n as u32;
            rest = &rest[n..];
        }
        Ok(start)
    }

    fn link_new_block(&mut self, payload: usize) -> Result<(), BlockError> {
        let next = self.alloc.allocate(self.file)?;
        let ptr = encoding::encode_to_vec(&Long40(next))?;
        self.file.write_at(self.link.last + payload as u64, &ptr)?;
        trace!(
            from = self.link.last,
            to = next,
            blocks = self.link.block_count + 1,
            "block link extended"
        );
        self.link.last = next;
        self.link.free_index = 0;
        self.link.block_count += 1;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Validated block positions of one chain, detached from any source.
///
/// Cursors keep one index per column so repeated segment loads do not
/// walk the chain again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkIndex {
    block_size: u32,
    link: BlockLink,
    positions: Vec<u64>,
}

impl LinkIndex {
    /// Walks `link` once, validating every offset and the block count.
    pub fn new<S: BlockSource + ?Sized>(
        source: &S,
        block_size: u32,
        link: BlockLink,
    ) -> Result<Self, BlockError> {
        let positions = walk_chain(source, block_size, &link)?;
        Ok(Self {
            block_size,
            link,
            positions,
        })
    }

    /// Offsets of every block in chain order.
    pub fn block_positions(&self) -> &[u64] {
        &self.positions
    }

    /// Logical length of the stream.
    pub fn len(&self) -> u64 {
        self.link.len(self.block_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `len` bytes starting at logical offset `from`.
    pub fn read<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        from: u64,
        len: usize,
    ) -> Result<Vec<u8>, BlockError> {
        let end = from
            .checked_add(len as u64)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                BlockError::Corrupt(format!(
                    "read of {len} bytes at {from} past end of link ({} bytes)",
                    self.len()
                ))
            })?;

        let payload = payload_size(self.block_size) as u64;
        let mut out = vec![0u8; len];
        let mut filled = 0usize;
        let mut cursor = from;
        while cursor < end {
            let block = (cursor / payload) as usize;
            let offset = cursor % payload;
            let n = (payload - offset).min(end - cursor) as usize;
            let pos = self.positions[block] + offset;
            source.read_at(pos, &mut out[filled..filled + n])?;
            filled += n;
            cursor += n as u64;
        }
        Ok(out)
    }
}

/// Reads a chain as one contiguous stream.
#[derive(Debug)]
pub struct BlockLinkReader<'a, S: BlockSource + ?Sized> {
    source: &'a S,
    index: LinkIndex,
}

impl<'a, S: BlockSource + ?Sized> BlockLinkReader<'a, S> {
    pub fn new(source: &'a S, block_size: u32, link: BlockLink) -> Result<Self, BlockError> {
        let index = LinkIndex::new(source, block_size, link)?;
        Ok(Self { source, index })
    }

    /// Offsets of every block in chain order.
    pub fn block_positions(&self) -> &[u64] {
        self.index.block_positions()
    }

    pub fn len(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Reads `len` bytes starting at logical offset `from`.
    pub fn read(&self, from: u64, len: usize) -> Result<Vec<u8>, BlockError> {
        self.index.read(self.source, from, len)
    }

    /// Reads the whole stream.
    pub fn read_all(&self) -> Result<Vec<u8>, BlockError> {
        self.read(0, self.len() as usize)
    }
}

/// Follows next-pointers from `link.first`, checking alignment, bounds
/// and the recorded block count.
fn walk_chain<S: BlockSource + ?Sized>(
    source: &S,
    block_size: u32,
    link: &BlockLink,
) -> Result<Vec<u64>, BlockError> {
    let payload = payload_size(block_size);
    if link.free_index as usize > payload {
        return Err(BlockError::Corrupt(format!(
            "free index {} exceeds block payload {payload}",
            link.free_index
        )));
    }
    if link.block_count == 0 {
        if link.first != 0 || link.last != 0 || link.free_index != 0 {
            return Err(BlockError::Corrupt("empty link with non-zero fields".into()));
        }
        return Ok(Vec::new());
    }

    let size = source.size()?;
    let bs = u64::from(block_size);
    let check = |pos: u64| -> Result<(), BlockError> {
        if pos < bs || pos % bs != 0 || pos + bs > size {
            return Err(BlockError::Corrupt(format!(
                "block offset {pos} is not a valid block (block size {bs}, file size {size})"
            )));
        }
        Ok(())
    };

    // Blocks past the prologue bound the count of any valid chain.
    let capacity = size / bs;
    if u64::from(link.block_count) > capacity {
        return Err(BlockError::Corrupt(format!(
            "link claims {} blocks, file holds at most {capacity}",
            link.block_count
        )));
    }

    let mut positions = Vec::with_capacity(link.block_count as usize);
    let mut pos = link.first;
    for k in 0..link.block_count {
        check(pos)?;
        positions.push(pos);
        if k + 1 == link.block_count {
            break;
        }
        let mut raw = [0u8; NEXT_POINTER_SIZE];
        source.read_at(pos + payload as u64, &mut raw)?;
        let (Long40(next), _) = Long40::decode_from(&raw)?;
        if next == 0 {
            return Err(BlockError::Corrupt(format!(
                "chain ends after {} of {} blocks",
                k + 1,
                link.block_count
            )));
        }
        pos = next;
    }

    if pos != link.last {
        return Err(BlockError::Corrupt(format!(
            "chain ends at {pos}, descriptor says {}",
            link.last
        )));
    }
    Ok(positions)
}
