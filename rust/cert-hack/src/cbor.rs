//! CBOR encoder implementing RFC 8949 canonical encoding.
//!
//! Supports the subset required for COSE/RKP structures:
//! - Unsigned and negative integers
//! - Byte strings and text strings
//! - Arrays and maps (with deterministic key ordering)
//! - Simple values (null, true, false)
//! - Pre-encoded items, validated once and spliced in verbatim
//!
//! Every item carries a definite length; indefinite-length encoding is never
//! produced.

use std::cmp::Ordering;

use coset::cbor::value::Value;
use thiserror::Error;

// CBOR Major Types
const MT_UNSIGNED: u8 = 0;
const MT_NEGATIVE: u8 = 1;
const MT_BYTE_STRING: u8 = 2;
const MT_TEXT_STRING: u8 = 3;
const MT_ARRAY: u8 = 4;
const MT_MAP: u8 = 5;
const MT_SIMPLE: u8 = 7;

/// Errors raised while decoding or validating CBOR bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CborError {
    #[error("malformed CBOR item")]
    Malformed,
    #[error("{0} trailing bytes after CBOR item")]
    TrailingData(usize),
    #[error("CBOR item type outside the supported subset")]
    Unsupported,
    #[error("CBOR integer out of range")]
    IntegerOverflow,
}

/// A single CBOR item that was encoded elsewhere.
///
/// Only [`PreEncoded::new`] builds one, and it rejects anything that is not
/// exactly one well-formed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreEncoded(Vec<u8>);

impl PreEncoded {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CborError> {
        decode_value(&bytes)?;
        Ok(PreEncoded(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A CBOR value that can be encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    /// Unsigned integer (major type 0).
    UnsignedInt(u64),
    /// Negative integer (major type 1). Holds the negative value itself.
    NegativeInt(i64),
    /// Byte string (major type 2).
    ByteString(Vec<u8>),
    /// Text string (major type 3).
    TextString(String),
    /// Array of CBOR values (major type 4).
    Array(Vec<CborValue>),
    /// Map of CBOR key-value pairs (major type 5).
    /// Keys are sorted in canonical order during encoding.
    Map(Vec<(CborValue, CborValue)>),
    /// Boolean value.
    Bool(bool),
    /// Null value.
    Null,
    /// An already-encoded item, written as-is.
    PreEncoded(PreEncoded),
}

impl CborValue {
    /// Create from a signed integer, choosing unsigned or negative encoding.
    pub fn from_int(value: i64) -> Self {
        if value >= 0 {
            CborValue::UnsignedInt(value as u64)
        } else {
            CborValue::NegativeInt(value)
        }
    }

    /// Wrap bytes that already hold one encoded CBOR item.
    pub fn pre_encoded(bytes: Vec<u8>) -> Result<Self, CborError> {
        PreEncoded::new(bytes).map(CborValue::PreEncoded)
    }

    /// Recursively reorder every map into canonical key order.
    ///
    /// Decoding canonical bytes yields exactly this form.
    pub fn into_canonical(self) -> Self {
        match self {
            CborValue::Array(items) => {
                CborValue::Array(items.into_iter().map(CborValue::into_canonical).collect())
            }
            CborValue::Map(entries) => {
                let mut entries: Vec<(CborValue, CborValue)> = entries
                    .into_iter()
                    .map(|(k, v)| (k.into_canonical(), v.into_canonical()))
                    .collect();
                entries.sort_by(|a, b| canonical_key_cmp(&a.0, &b.0));
                CborValue::Map(entries)
            }
            other => other,
        }
    }
}

/// Encode a CBOR value to bytes.
pub fn encode(value: &CborValue) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    encode_into(&mut buf, value);
    buf
}

fn encode_into(buf: &mut Vec<u8>, value: &CborValue) {
    match value {
        CborValue::UnsignedInt(v) => encode_type_and_length(buf, MT_UNSIGNED, *v),
        CborValue::NegativeInt(v) => {
            let encoded = (-1 - *v) as u64;
            encode_type_and_length(buf, MT_NEGATIVE, encoded)
        }
        CborValue::ByteString(bytes) => {
            encode_type_and_length(buf, MT_BYTE_STRING, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
        CborValue::TextString(s) => {
            let bytes = s.as_bytes();
            encode_type_and_length(buf, MT_TEXT_STRING, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
        CborValue::Array(items) => {
            encode_type_and_length(buf, MT_ARRAY, items.len() as u64);
            for item in items {
                encode_into(buf, item);
            }
        }
        CborValue::Map(entries) => {
            encode_type_and_length(buf, MT_MAP, entries.len() as u64);

            // Sort entries by canonical key ordering (RFC 8949 Section 4.2.1).
            let mut sorted: Vec<&(CborValue, CborValue)> = entries.iter().collect();
            sorted.sort_by(|a, b| canonical_key_cmp(&a.0, &b.0));

            for (key, val) in sorted {
                encode_into(buf, key);
                encode_into(buf, val);
            }
        }
        CborValue::Bool(b) => encode_type_and_length(buf, MT_SIMPLE, if *b { 21 } else { 20 }),
        CborValue::Null => encode_type_and_length(buf, MT_SIMPLE, 22),
        CborValue::PreEncoded(item) => buf.extend_from_slice(item.as_bytes()),
    }
}

/// Write the initial byte plus the smallest argument that holds `value`.
fn encode_type_and_length(buf: &mut Vec<u8>, major_type: u8, value: u64) {
    let mt = major_type << 5;
    if value < 24 {
        buf.push(mt | value as u8);
    } else if value <= 0xFF {
        buf.extend_from_slice(&[mt | 24, value as u8]);
    } else if value <= 0xFFFF {
        buf.push(mt | 25);
        buf.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= 0xFFFF_FFFF {
        buf.push(mt | 26);
        buf.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Compare CBOR map keys in canonical order (RFC 8949 Section 4.2.1).
///
/// This is the bytewise order of the encoded keys:
/// - Integer keys: Major type 0 (positive) < Major type 1 (negative).
///   Within same type, smaller absolute values first.
/// - String keys: Shorter strings first, then lexicographic byte comparison.
/// - Mixed: Integer keys come before string keys (lower major type first).
fn canonical_key_cmp(a: &CborValue, b: &CborValue) -> Ordering {
    match (a, b) {
        (CborValue::UnsignedInt(a_val), CborValue::UnsignedInt(b_val)) => a_val.cmp(b_val),
        // -1 (encoded as 0) < -2 (encoded as 1)
        (CborValue::NegativeInt(a_val), CborValue::NegativeInt(b_val)) => b_val.cmp(a_val),
        (CborValue::UnsignedInt(_), CborValue::NegativeInt(_)) => Ordering::Less,
        (CborValue::NegativeInt(_), CborValue::UnsignedInt(_)) => Ordering::Greater,

        (CborValue::TextString(a_str), CborValue::TextString(b_str)) => {
            let a_bytes = a_str.as_bytes();
            let b_bytes = b_str.as_bytes();
            match a_bytes.len().cmp(&b_bytes.len()) {
                Ordering::Equal => a_bytes.cmp(b_bytes),
                other => other,
            }
        }

        (CborValue::UnsignedInt(_) | CborValue::NegativeInt(_), CborValue::TextString(_)) => {
            Ordering::Less
        }
        (CborValue::TextString(_), CborValue::UnsignedInt(_) | CborValue::NegativeInt(_)) => {
            Ordering::Greater
        }

        // Fallback: compare by encoded bytes
        _ => encode(a).cmp(&encode(b)),
    }
}

/// Decode exactly one CBOR item from `bytes`.
///
/// Maps come back in wire order, so decoding canonical output yields the
/// [`CborValue::into_canonical`] form of what was encoded.
pub fn decode(bytes: &[u8]) -> Result<CborValue, CborError> {
    CborValue::try_from(decode_value(bytes)?)
}

fn decode_value(bytes: &[u8]) -> Result<Value, CborError> {
    let mut reader = bytes;
    let value: Value =
        coset::cbor::de::from_reader(&mut reader).map_err(|_| CborError::Malformed)?;
    if !reader.is_empty() {
        return Err(CborError::TrailingData(reader.len()));
    }
    Ok(value)
}

impl TryFrom<Value> for CborValue {
    type Error = CborError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Integer(i) => {
                let i = i128::from(i);
                if i >= 0 {
                    CborValue::UnsignedInt(u64::try_from(i).map_err(|_| CborError::IntegerOverflow)?)
                } else {
                    CborValue::NegativeInt(i64::try_from(i).map_err(|_| CborError::IntegerOverflow)?)
                }
            }
            Value::Bytes(bytes) => CborValue::ByteString(bytes),
            Value::Text(text) => CborValue::TextString(text),
            Value::Bool(b) => CborValue::Bool(b),
            Value::Null => CborValue::Null,
            Value::Array(items) => CborValue::Array(
                items
                    .into_iter()
                    .map(CborValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => CborValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((CborValue::try_from(k)?, CborValue::try_from(v)?)))
                    .collect::<Result<_, CborError>>()?,
            ),
            _ => return Err(CborError::Unsupported),
        })
    }
}
