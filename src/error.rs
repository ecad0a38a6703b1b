//! VEIL - Custom Error Types
//! Defines the error hierarchy for the store adapter and its engine.

use thiserror::Error;

/// Custom Result type for veil.
pub type Result<T> = std::result::Result<T, VeilError>;

/// Error types for the store adapter and the LSM engine.
///
/// A missing key is never an error: reads report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum VeilError {
    /// I/O errors from file operations (WAL, tables).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A typed value could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes do not parse as the requested type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Data corruption detected (CRC mismatch, bad framing).
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// WAL recovery failure.
    #[error("WAL recovery failed: {0}")]
    RecoveryFailed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The persisted obfuscation key is malformed.
    #[error("Invalid obfuscation key: {0}")]
    ObfuscateKey(String),

    /// A write batch was committed to a store other than the one that built it.
    #[error("Write batch belongs to a different store")]
    ForeignBatch,

    /// A mutation targeted the engine key that holds the obfuscation key.
    #[error("Key is reserved for the store's obfuscation key")]
    ReservedKey,

    /// An iterator accessor was called while the iterator was not positioned.
    #[error("Iterator is not positioned at an entry")]
    NotPositioned,

    /// An internal lock was poisoned by a panicking thread.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Failure reported by an engine implementation.
    #[error("Engine error: {0}")]
    Engine(String),
}

impl VeilError {
    /// Returns true for errors raised while decoding stored bytes.
    pub fn is_decode(&self) -> bool {
        matches!(self, VeilError::Decode(_))
    }
}
