//! Encode / Decode implementations for block descriptors.

use super::BlockLink;
use crate::encoding::{Decode, Encode, EncodingError, Long40};

// ------------------------------------------------------------------------------------------------
// Encode / Decode: BlockLink
// ------------------------------------------------------------------------------------------------

impl Encode for BlockLink {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        Long40(self.first).encode_to(buf)?;
        Long40(self.last).encode_to(buf)?;
        self.free_index.encode_to(buf)?;
        self.block_count.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockLink {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (Long40(first), n) = Long40::decode_from(&buf[offset..])?;
        offset += n;
        let (Long40(last), n) = Long40::decode_from(&buf[offset..])?;
        offset += n;
        let (free_index, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (block_count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            BlockLink {
                first,
                last,
                free_index,
                block_count,
            },
            offset,
        ))
    }
}
