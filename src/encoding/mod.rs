//! Binary codec for everything a group-table file persists.
//!
//! Header payloads, block link descriptors, segment records and column
//! values all go through the [`Encode`] / [`Decode`] pair defined here.
//! The layout is fixed by this module alone:
//!
//! ```text
//! u8 / bool                1 byte (bool: 0x00 | 0x01)
//! u32 / i32                4 bytes LE
//! u64 / i64 / f64          8 bytes LE (f64 as IEEE-754 bits)
//! Long40                   5 bytes LE, file offsets up to 2^40 - 1
//! [u8; N]                  N raw bytes
//! Vec<u8> / String / &str  [u32 len][bytes]          len <= MAX_BYTE_LEN
//! Option<T>                [0] | [1][T]
//! encode_vec(&[T])         [u32 count][T]...          count <= MAX_VEC_ELEMENTS
//! decode_n(buf, n)         [T] x n, no prefix (column segment payloads)
//! ```
//!
//! Limits are enforced on both sides: a value that encodes successfully
//! always decodes, and a corrupted length prefix cannot force a huge
//! allocation.


use thiserror::Error;

/// Longest byte string or UTF-8 string accepted (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

/// Largest element count accepted by [`encode_vec`] / [`decode_vec`].
pub const MAX_VEC_ELEMENTS: u32 = 16 * 1024 * 1024;

/// Largest value a [`Long40`] can hold.
pub const LONG40_MAX: u64 = (1 << 40) - 1;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag { tag: u32, type_name: &'static str },

    #[error("invalid bool byte: 0x{0:02X}")]
    InvalidBool(u8),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length, count or offset is outside its encodable range.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    /// Structural error reported by a type's own decoder.
    #[error("{0}")]
    Custom(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Appends a deterministic byte representation of `self`.
pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Reads one value from the front of `buf`, returning it with the number
/// of bytes consumed.
pub trait Decode: Sized {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn fixed<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    match buf.get(..N) {
        Some(head) => {
            let mut out = [0u8; N];
            out.copy_from_slice(head);
            Ok(out)
        }
        None => Err(EncodingError::UnexpectedEof {
            needed: N,
            available: buf.len(),
        }),
    }
}

/// Writes a `u32` length prefix after checking it against `limit`.
fn put_len(len: usize, limit: u32, what: &str, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    match u32::try_from(len) {
        Ok(n) if n <= limit => n.encode_to(buf),
        _ => Err(EncodingError::LengthOverflow(format!(
            "{what} length {len} exceeds {limit}"
        ))),
    }
}

/// Reads a `u32` length prefix and checks it against `limit`.
fn take_len(buf: &[u8], limit: u32, what: &str) -> Result<(usize, usize), EncodingError> {
    let (n, used) = u32::decode_from(buf)?;
    if n > limit {
        return Err(EncodingError::LengthOverflow(format!(
            "{what} length {n} exceeds {limit}"
        )));
    }
    Ok((n as usize, used))
}

fn put_bytes(bytes: &[u8], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    put_len(bytes.len(), MAX_BYTE_LEN, "byte string", buf)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn take_bytes(buf: &[u8]) -> Result<(&[u8], usize), EncodingError> {
    let (len, used) = take_len(buf, MAX_BYTE_LEN, "byte string")?;
    let rest = &buf[used..];
    let body = rest.get(..len).ok_or(EncodingError::UnexpectedEof {
        needed: len,
        available: rest.len(),
    })?;
    Ok((body, used + len))
}

// ------------------------------------------------------------------------------------------------
// Numbers
// ------------------------------------------------------------------------------------------------

macro_rules! le_number {
    ($($ty:ty),* $(,)?) => {$(
        impl Encode for $ty {
            #[inline]
            fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                buf.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                Ok((<$ty>::from_le_bytes(fixed::<WIDTH>(buf)?), WIDTH))
            }
        }
    )*};
}

le_number!(u8, u32, u64, i32, i64);

impl Encode for f64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.to_bits().encode_to(buf)
    }
}

impl Decode for f64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bits, n) = u64::decode_from(buf)?;
        Ok((f64::from_bits(bits), n))
    }
}

impl Encode for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        u8::from(*self).encode_to(buf)
    }
}

impl Decode for bool {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match u8::decode_from(buf)? {
            (0, n) => Ok((false, n)),
            (1, n) => Ok((true, n)),
            (other, _) => Err(EncodingError::InvalidBool(other)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Long40
// ------------------------------------------------------------------------------------------------

/// A file offset stored in 5 bytes, so a block link descriptor fits the
/// 32-byte prologue. Values above [`LONG40_MAX`] fail to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Long40(pub u64);

impl Encode for Long40 {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        if self.0 > LONG40_MAX {
            return Err(EncodingError::LengthOverflow(format!(
                "offset {} exceeds 40-bit range",
                self.0
            )));
        }
        buf.extend_from_slice(&self.0.to_le_bytes()[..5]);
        Ok(())
    }
}

impl Decode for Long40 {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let low: [u8; 5] = fixed(buf)?;
        let offset = low
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Ok((Long40(offset), 5))
    }
}

// ------------------------------------------------------------------------------------------------
// Byte strings
// ------------------------------------------------------------------------------------------------

impl<const N: usize> Encode for [u8; N] {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((fixed(buf)?, N))
    }
}

impl Encode for Vec<u8> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        put_bytes(self, buf)
    }
}

impl Decode for Vec<u8> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (body, n) = take_bytes(buf)?;
        Ok((body.to_vec(), n))
    }
}

impl Encode for str {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        put_bytes(self.as_bytes(), buf)
    }
}

impl Encode for String {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_str().encode_to(buf)
    }
}

impl Decode for String {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (body, n) = take_bytes(buf)?;
        Ok((String::from_utf8(body.to_vec())?, n))
    }
}

// ------------------------------------------------------------------------------------------------
// Option and sequences
// ------------------------------------------------------------------------------------------------

impl<T: Encode> Encode for Option<T> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            None => 0u8.encode_to(buf),
            Some(inner) => {
                1u8.encode_to(buf)?;
                inner.encode_to(buf)
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match u8::decode_from(buf)? {
            (0, n) => Ok((None, n)),
            (1, n) => {
                let (inner, used) = T::decode_from(&buf[n..])?;
                Ok((Some(inner), n + used))
            }
            (tag, _) => Err(EncodingError::InvalidTag {
                tag: u32::from(tag),
                type_name: "Option",
            }),
        }
    }
}

/// Writes `[u32 count][items...]`.
///
/// A free function rather than an `impl Encode for Vec<T>`, which would
/// overlap the length-prefixed `Vec<u8>` impl.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    put_len(items.len(), MAX_VEC_ELEMENTS, "vector", buf)?;
    items.iter().try_for_each(|item| item.encode_to(buf))
}

/// Reads `[u32 count][items...]`.
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, used) = take_len(buf, MAX_VEC_ELEMENTS, "vector")?;
    let (items, body) = decode_n(&buf[used..], count)?;
    Ok((items, used + body))
}

/// Reads exactly `count` values laid out back to back with no prefix.
pub fn decode_n<T: Decode>(buf: &[u8], count: usize) -> Result<(Vec<T>, usize), EncodingError> {
    let mut items = Vec::with_capacity(count.min(buf.len()));
    let mut offset = 0;
    for _ in 0..count {
        let (item, used) = T::decode_from(&buf[offset..])?;
        offset += used;
        items.push(item);
    }
    Ok((items, offset))
}
