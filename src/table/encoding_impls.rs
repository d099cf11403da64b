//! Encode / Decode implementations for table metadata and segment records.

use super::{
    AnnexMeta, ColumnMeta, PartMeta, SegmentEntry, SegmentRecord, TableFlags, TableMeta,
};
use crate::block::BlockLink;
use crate::encoding::{Decode, Encode, EncodingError, Long40, decode_vec, encode_vec};
use crate::value::{Value, ValueKind};

const FLAG_COMPRESS: u8 = 0x01;
const FLAG_TIME_KEY: u8 = 0x02;
const FLAG_DELETE_KEY: u8 = 0x04;
const FLAG_CHECK_PURE: u8 = 0x08;
const FLAG_MASK: u8 = FLAG_COMPRESS | FLAG_TIME_KEY | FLAG_DELETE_KEY | FLAG_CHECK_PURE;

// ------------------------------------------------------------------------------------------------
// Encode / Decode: TableFlags (one bit set)
// ------------------------------------------------------------------------------------------------

impl Encode for TableFlags {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let mut bits = 0u8;
        if self.compress {
            bits |= FLAG_COMPRESS;
        }
        if self.time_key {
            bits |= FLAG_TIME_KEY;
        }
        if self.delete_key {
            bits |= FLAG_DELETE_KEY;
        }
        if self.check_pure {
            bits |= FLAG_CHECK_PURE;
        }
        bits.encode_to(buf)
    }
}

impl Decode for TableFlags {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bits, n) = u8::decode_from(buf)?;
        if bits & !FLAG_MASK != 0 {
            return Err(EncodingError::Custom(format!("unknown table flags 0x{bits:02X}")));
        }
        Ok((
            TableFlags {
                compress: bits & FLAG_COMPRESS != 0,
                time_key: bits & FLAG_TIME_KEY != 0,
                delete_key: bits & FLAG_DELETE_KEY != 0,
                check_pure: bits & FLAG_CHECK_PURE != 0,
            },
            n,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode: ColumnMeta
// ------------------------------------------------------------------------------------------------

impl Encode for ColumnMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.kind.encode_to(buf)?;
        self.data.encode_to(buf)?;
        self.segments.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ColumnMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        let (kind, n) = Option::<ValueKind>::decode_from(&buf[offset..])?;
        offset += n;
        let (data, n) = BlockLink::decode_from(&buf[offset..])?;
        offset += n;
        let (segments, n) = BlockLink::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            ColumnMeta {
                name,
                key,
                kind,
                data,
                segments,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode: PartMeta
// ------------------------------------------------------------------------------------------------

impl Encode for PartMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encode_vec(&self.columns, buf)?;
        self.segment_link.encode_to(buf)?;
        self.segment_count.encode_to(buf)?;
        self.row_count.encode_to(buf)?;
        encode_vec(&self.last_key, buf)?;
        Ok(())
    }
}

impl Decode for PartMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (columns, n) = decode_vec::<ColumnMeta>(&buf[offset..])?;
        offset += n;
        let (segment_link, n) = BlockLink::decode_from(&buf[offset..])?;
        offset += n;
        let (segment_count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (row_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_key, n) = decode_vec::<Value>(&buf[offset..])?;
        offset += n;
        Ok((
            PartMeta {
                columns,
                segment_link,
                segment_count,
                row_count,
                last_key,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode: AnnexMeta, TableMeta
// ------------------------------------------------------------------------------------------------

impl Encode for AnnexMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.part.encode_to(buf)
    }
}

impl Decode for AnnexMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (name, mut offset) = String::decode_from(buf)?;
        let (part, n) = PartMeta::decode_from(&buf[offset..])?;
        offset += n;
        Ok((AnnexMeta { name, part }, offset))
    }
}

impl Encode for TableMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.flags.encode_to(buf)?;
        self.segment_rows.encode_to(buf)?;
        self.base.encode_to(buf)?;
        encode_vec(&self.annexes, buf)?;
        Ok(())
    }
}

impl Decode for TableMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (flags, n) = TableFlags::decode_from(&buf[offset..])?;
        offset += n;
        let (segment_rows, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (base, n) = PartMeta::decode_from(&buf[offset..])?;
        offset += n;
        let (annexes, n) = decode_vec::<AnnexMeta>(&buf[offset..])?;
        offset += n;
        Ok((
            TableMeta {
                flags,
                segment_rows,
                base,
                annexes,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode: segment records
// ------------------------------------------------------------------------------------------------

impl Encode for SegmentRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.rows.encode_to(buf)?;
        encode_vec(&self.last_key, buf)
    }
}

impl Decode for SegmentRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (rows, mut offset) = u32::decode_from(buf)?;
        let (last_key, n) = decode_vec::<Value>(&buf[offset..])?;
        offset += n;
        Ok((SegmentRecord { rows, last_key }, offset))
    }
}

impl Encode for SegmentEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        Long40(self.position).encode_to(buf)?;
        self.byte_len.encode_to(buf)?;
        match &self.bounds {
            None => false.encode_to(buf)?,
            Some((min, max)) => {
                true.encode_to(buf)?;
                min.encode_to(buf)?;
                max.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for SegmentEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (Long40(position), n) = Long40::decode_from(&buf[offset..])?;
        offset += n;
        let (byte_len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (has_bounds, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        let bounds = if has_bounds {
            let (min, n) = Value::decode_from(&buf[offset..])?;
            offset += n;
            let (max, n) = Value::decode_from(&buf[offset..])?;
            offset += n;
            Some((min, max))
        } else {
            None
        };
        Ok((
            SegmentEntry {
                position,
                byte_len,
                bounds,
            },
            offset,
        ))
    }
}
