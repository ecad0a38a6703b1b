//! VEIL - Value Obfuscation
//! Creates, persists, and applies the XOR mask used to keep stored
//! values from being directly legible on disk.
//!
//! This is not encryption: the mask is stored in the same database.
//! A store without obfuscation uses the all-zero key, so both modes
//! share one code path.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::engine::{KvEngine, ReadOptions, WriteOptions};
use crate::error::{Result, VeilError};
use crate::types::Mutation;

/// Length of the obfuscation key in bytes.
pub const OBFUSCATE_KEY_LEN: usize = 8;

/// Reserved engine key under which the obfuscation key is stored.
/// Write batches refuse to touch it.
pub(crate) const OBFUSCATE_KEY_KEY: &[u8] = b"\x00obfuscate_key";

/// Fixed-length XOR mask applied to stored values.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ObfuscateKey([u8; OBFUSCATE_KEY_LEN]);

impl ObfuscateKey {
    /// The all-zero key: XOR with it is a no-op.
    pub fn zero() -> Self {
        Self([0u8; OBFUSCATE_KEY_LEN])
    }

    /// Generate a key from the operating system's random source.
    pub fn random() -> Self {
        let mut bytes = [0u8; OBFUSCATE_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a key from persisted bytes, checking the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; OBFUSCATE_KEY_LEN] = bytes.try_into().map_err(|_| {
            VeilError::ObfuscateKey(format!(
                "expected {} bytes, found {}",
                OBFUSCATE_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; OBFUSCATE_KEY_LEN] {
        &self.0
    }

    /// Returns true for the all-zero key.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// XOR `data` in place with the key, repeating the key as needed.
    /// Applying it twice restores the original bytes.
    pub fn apply(&self, data: &mut [u8]) {
        if self.is_zero() {
            return;
        }
        for (byte, mask) in data.iter_mut().zip(self.0.iter().cycle()) {
            *byte ^= mask;
        }
    }

    /// Lowercase hex rendering, used in logs.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for ObfuscateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObfuscateKey({})", self.to_hex())
    }
}

/// Load the store's obfuscation key, creating and persisting one if needed.
///
/// - A persisted key always wins, whatever `obfuscate` says.
/// - An empty store gets a random key (or the zero key when `obfuscate`
///   is false), written synchronously before anything else.
/// - A store that already holds unobfuscated data keeps the zero key.
pub(crate) fn create_or_load<E: KvEngine>(engine: &E, obfuscate: bool) -> Result<ObfuscateKey> {
    let read = ReadOptions {
        verify_checksums: true,
        fill_cache: true,
    };
    if let Some(bytes) = engine.get(&read, OBFUSCATE_KEY_KEY)? {
        return ObfuscateKey::from_bytes(&bytes);
    }

    let empty = !engine.has_key_besides(&read, OBFUSCATE_KEY_KEY)?;

    let key = if obfuscate && empty {
        let key = ObfuscateKey::random();
        log::info!("Wrote new obfuscation key {}", key.to_hex());
        key
    } else {
        if obfuscate {
            log::warn!("Store already holds unobfuscated data; obfuscation stays disabled");
        }
        ObfuscateKey::zero()
    };

    engine.write(
        &WriteOptions { sync: true },
        &[Mutation::put(OBFUSCATE_KEY_KEY.to_vec(), key.as_bytes().to_vec())],
    )?;
    Ok(key)
}
