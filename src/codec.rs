//! VEIL - Typed Codec Adapter
//! Converts typed keys and values to and from the byte sequences
//! stored by the engine, using serde + bincode.
//!
//! ## Encoding
//! - Big-endian, fixed-width integers: unsigned integer keys sort
//!   numerically under the engine's bytewise ordering.
//! - Trailing bytes are rejected on decode, so a value written as `u64`
//!   never silently decodes as `u32`.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, VeilError};

/// Buffer capacity reserved before encoding a key.
pub const PREALLOC_KEY_SIZE: usize = 64;

/// Buffer capacity reserved before encoding a value.
pub const PREALLOC_VALUE_SIZE: usize = 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Encode `value` into a buffer that starts with `capacity` bytes reserved.
/// The capacity only affects allocation, never the produced bytes.
pub fn encode_with_capacity<T: Serialize + ?Sized>(value: &T, capacity: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(capacity);
    options()
        .serialize_into(&mut buf, value)
        .map_err(|e| VeilError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Encode a typed key.
pub fn encode_key<K: Serialize + ?Sized>(key: &K) -> Result<Vec<u8>> {
    encode_with_capacity(key, PREALLOC_KEY_SIZE)
}

/// Encode a typed value (before obfuscation).
pub fn encode_value<V: Serialize + ?Sized>(value: &V) -> Result<Vec<u8>> {
    encode_with_capacity(value, PREALLOC_VALUE_SIZE)
}

/// Decode bytes into `T`. Malformed or truncated input yields
/// [`VeilError::Decode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    options()
        .deserialize(bytes)
        .map_err(|e| VeilError::Decode(e.to_string()))
}
