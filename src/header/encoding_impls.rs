//! Encode / Decode implementations for the prologue and header payload.
//!
//! Header fields are gated on the version byte (`reserve[0]`), which is
//! decoded before any optional field.

use super::{Header, MAGIC, PROLOGUE_SIZE, Prologue};
use crate::block::BlockLink;
use crate::encoding::{
    Decode, Encode, EncodingError, Long40, MAX_VEC_ELEMENTS, decode_vec, encode_vec,
};

// ------------------------------------------------------------------------------------------------
// Encode / Decode: Prologue
// ------------------------------------------------------------------------------------------------

impl Encode for Prologue {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let start = buf.len();
        MAGIC.encode_to(buf)?;
        self.marker.encode_to(buf)?;
        self.block_size.encode_to(buf)?;
        self.root.encode_to(buf)?;
        buf.resize(start + PROLOGUE_SIZE, 0);
        Ok(())
    }
}

impl Decode for Prologue {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        if buf.len() < PROLOGUE_SIZE {
            return Err(EncodingError::UnexpectedEof {
                needed: PROLOGUE_SIZE,
                available: buf.len(),
            });
        }
        let (magic, mut offset) = <[u8; 6]>::decode_from(buf)?;
        if magic != MAGIC {
            return Err(EncodingError::Custom("bad prologue magic".into()));
        }
        let (marker, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let (block_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (root, _) = BlockLink::decode_from(&buf[offset..])?;
        Ok((
            Prologue {
                marker,
                block_size,
                root,
            },
            PROLOGUE_SIZE,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Free-block entries (Long40 offsets)
// ------------------------------------------------------------------------------------------------

fn encode_offsets(offsets: &[u64], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    let wrapped: Vec<Long40> = offsets.iter().map(|p| Long40(*p)).collect();
    encode_vec(&wrapped, buf)
}

fn decode_offsets(buf: &[u8]) -> Result<(Vec<u64>, usize), EncodingError> {
    let (wrapped, n) = decode_vec::<Long40>(buf)?;
    Ok((wrapped.into_iter().map(|Long40(p)| p).collect(), n))
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode: Header
// ------------------------------------------------------------------------------------------------

impl Encode for Header {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let version = self.reserve[0];

        MAGIC.encode_to(buf)?;
        self.marker.encode_to(buf)?;
        self.block_size.encode_to(buf)?;
        self.root.encode_to(buf)?;
        self.reserve.encode_to(buf)?;
        Long40(self.free_pos).encode_to(buf)?;
        Long40(self.file_size).encode_to(buf)?;

        if version >= 1 {
            self.write_password_hash.encode_to(buf)?;
            self.read_password_hash.encode_to(buf)?;
        }
        if version >= 2 {
            self.distribute.encode_to(buf)?;
        }

        (self.schemas.len() as u32).encode_to(buf)?;
        for fields in &self.schemas {
            encode_vec(fields, buf)?;
        }

        if version >= 4 {
            self.enlarge_blocks.encode_to(buf)?;
            encode_offsets(&self.free_blocks, buf)?;
            self.metadata.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Header {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (magic, mut offset) = <[u8; 6]>::decode_from(buf)?;
        if magic != MAGIC {
            return Err(EncodingError::Custom("bad header magic".into()));
        }
        let (marker, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let (block_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (root, n) = BlockLink::decode_from(&buf[offset..])?;
        offset += n;
        let (reserve, n) = <[u8; 32]>::decode_from(&buf[offset..])?;
        offset += n;
        let (Long40(free_pos), n) = Long40::decode_from(&buf[offset..])?;
        offset += n;
        let (Long40(file_size), n) = Long40::decode_from(&buf[offset..])?;
        offset += n;

        let version = reserve[0];
        let mut header = Header {
            marker,
            block_size,
            root,
            reserve,
            free_pos,
            file_size,
            write_password_hash: None,
            read_password_hash: None,
            distribute: None,
            schemas: Vec::new(),
            enlarge_blocks: 1,
            free_blocks: Vec::new(),
            metadata: Vec::new(),
        };

        if version >= 1 {
            let (w, n) = Option::<String>::decode_from(&buf[offset..])?;
            offset += n;
            let (r, n) = Option::<String>::decode_from(&buf[offset..])?;
            offset += n;
            header.write_password_hash = w;
            header.read_password_hash = r;
        }
        if version >= 2 {
            let (d, n) = Option::<String>::decode_from(&buf[offset..])?;
            offset += n;
            header.distribute = d;
        }

        let (schema_count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        if schema_count > MAX_VEC_ELEMENTS {
            return Err(EncodingError::LengthOverflow(format!(
                "schema count {schema_count} exceeds MAX_VEC_ELEMENTS"
            )));
        }
        for _ in 0..schema_count {
            let (fields, n) = decode_vec::<String>(&buf[offset..])?;
            offset += n;
            header.schemas.push(fields);
        }

        if version >= 4 {
            let (enlarge, n) = u32::decode_from(&buf[offset..])?;
            offset += n;
            let (free_blocks, n) = decode_offsets(&buf[offset..])?;
            offset += n;
            let (metadata, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            header.enlarge_blocks = enlarge;
            header.free_blocks = free_blocks;
            header.metadata = metadata;
        }

        Ok((header, offset))
    }
}
