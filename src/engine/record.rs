//! VEIL - Mutation Record Framing
//! Binary framing shared by the WAL and table files.
//!
//! ## Binary Format (per record)
//! ```text
//! [op_type: 1 byte][key_len: 4 bytes (LE)][key: N bytes][val_len: 4 bytes (LE)][value: M bytes][crc: 4 bytes (LE)]
//! ```
//! The CRC32 covers every byte before it. Deletes carry `val_len = 0`.

use bytes::{Buf, BufMut};

use crate::error::{Result, VeilError};
use crate::types::Mutation;

/// Fixed bytes per record besides key and value.
pub const RECORD_OVERHEAD: usize = 1 + 4 + 4 + 4;

/// Operation type tag.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum OpType {
    Put = 1,
    Delete = 2,
}

/// Append the encoding of `mutation` to `buf`. Returns the bytes written.
pub fn encode_into(buf: &mut Vec<u8>, mutation: &Mutation) -> usize {
    let start = buf.len();
    let (tag, key, value): (OpType, &[u8], &[u8]) = match mutation {
        Mutation::Put { key, value } => (OpType::Put, key.as_slice(), value.as_slice()),
        Mutation::Delete { key } => (OpType::Delete, key.as_slice(), &[]),
    };
    buf.put_u8(tag as u8);
    buf.put_u32_le(key.len() as u32);
    buf.put_slice(key);
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
    let crc = crc32fast::hash(&buf[start..]);
    buf.put_u32_le(crc);
    buf.len() - start
}

/// Encode a single mutation into a fresh buffer.
pub fn encode(mutation: &Mutation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(mutation));
    encode_into(&mut buf, mutation);
    buf
}

/// Exact encoded size of `mutation`.
pub fn encoded_len(mutation: &Mutation) -> usize {
    RECORD_OVERHEAD + mutation.key().len() + mutation.value().map_or(0, |v| v.len())
}

/// Decode the record at the start of `buf`.
/// Returns the mutation and the number of bytes consumed.
/// With `verify` set, a CRC mismatch is reported as corruption.
pub fn decode(buf: &[u8], verify: bool) -> Result<(Mutation, usize)> {
    let mut cursor = buf;

    if cursor.remaining() < 5 {
        return Err(truncated());
    }
    let tag = cursor.get_u8();
    let key_len = cursor.get_u32_le() as usize;
    if cursor.remaining() < key_len + 4 {
        return Err(truncated());
    }
    let key = cursor[..key_len].to_vec();
    cursor.advance(key_len);
    let val_len = cursor.get_u32_le() as usize;
    if cursor.remaining() < val_len + 4 {
        return Err(truncated());
    }
    let value = cursor[..val_len].to_vec();
    cursor.advance(val_len);

    let body_len = buf.len() - cursor.remaining();
    let stored_crc = cursor.get_u32_le();
    if verify && crc32fast::hash(&buf[..body_len]) != stored_crc {
        return Err(VeilError::Corruption("record checksum mismatch".into()));
    }

    let mutation = match tag {
        t if t == OpType::Put as u8 => Mutation::put(key, value),
        t if t == OpType::Delete as u8 => Mutation::delete(key),
        other => {
            return Err(VeilError::Corruption(format!(
                "unknown record type {}",
                other
            )))
        }
    };
    Ok((mutation, body_len + 4))
}

fn truncated() -> VeilError {
    VeilError::Corruption("truncated record".into())
}
