//! Encode / Decode implementations for [`Value`].
//!
//! Each value is a one-byte kind tag followed by its payload.  Column
//! segments store values back to back with this encoding.

use super::{Value, ValueKind};
use crate::encoding::{Decode, Encode, EncodingError};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_LONG: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_DATE: u8 = 5;
const TAG_STRING: u8 = 6;

// ------------------------------------------------------------------------------------------------
// Encode / Decode: Value
// ------------------------------------------------------------------------------------------------

impl Encode for Value {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Value::Null => TAG_NULL.encode_to(buf)?,
            Value::Bool(v) => {
                TAG_BOOL.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Value::Int(v) => {
                TAG_INT.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Value::Long(v) => {
                TAG_LONG.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Value::Double(v) => {
                TAG_DOUBLE.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Value::Date(v) => {
                TAG_DATE.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Value::String(v) => {
                TAG_STRING.encode_to(buf)?;
                v.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Value {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, offset) = u8::decode_from(buf)?;
        let rest = &buf[offset..];
        let (value, n) = match tag {
            TAG_NULL => (Value::Null, 0),
            TAG_BOOL => {
                let (v, n) = bool::decode_from(rest)?;
                (Value::Bool(v), n)
            }
            TAG_INT => {
                let (v, n) = i32::decode_from(rest)?;
                (Value::Int(v), n)
            }
            TAG_LONG => {
                let (v, n) = i64::decode_from(rest)?;
                (Value::Long(v), n)
            }
            TAG_DOUBLE => {
                let (v, n) = f64::decode_from(rest)?;
                (Value::Double(v), n)
            }
            TAG_DATE => {
                let (v, n) = i64::decode_from(rest)?;
                (Value::Date(v), n)
            }
            TAG_STRING => {
                let (v, n) = String::decode_from(rest)?;
                (Value::String(v), n)
            }
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: u32::from(other),
                    type_name: "Value",
                });
            }
        };
        Ok((value, offset + n))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode: ValueKind (same tags as the values themselves)
// ------------------------------------------------------------------------------------------------

impl Encode for ValueKind {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag = match self {
            ValueKind::Null => TAG_NULL,
            ValueKind::Bool => TAG_BOOL,
            ValueKind::Int => TAG_INT,
            ValueKind::Long => TAG_LONG,
            ValueKind::Double => TAG_DOUBLE,
            ValueKind::Date => TAG_DATE,
            ValueKind::String => TAG_STRING,
        };
        tag.encode_to(buf)
    }
}

impl Decode for ValueKind {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let kind = match tag {
            TAG_NULL => ValueKind::Null,
            TAG_BOOL => ValueKind::Bool,
            TAG_INT => ValueKind::Int,
            TAG_LONG => ValueKind::Long,
            TAG_DOUBLE => ValueKind::Double,
            TAG_DATE => ValueKind::Date,
            TAG_STRING => ValueKind::String,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: u32::from(other),
                    type_name: "ValueKind",
                });
            }
        };
        Ok((kind, n))
    }
}
