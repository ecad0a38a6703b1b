//! VEIL - Write-Ahead Log (WAL)
//! Provides durability by logging every committed batch to disk
//! before it is applied to the in-memory MemTable.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use crate::error::{Result, VeilError};
use crate::types::Mutation;

use super::memtable::MemTable;
use super::record;

/// Bytes of framing in front of each batch payload.
const BATCH_HEADER_LEN: usize = 8;

/// Write-Ahead Log for crash recovery and durability.
///
/// One log record holds one whole batch, so a batch is either
/// replayed completely or not at all.
///
/// ## Binary Format (per batch)
/// ```text
/// [payload_len: 4 bytes (LE)][crc: 4 bytes (LE)][count: 4 bytes (LE)][record]*count
/// ```
/// The CRC covers the payload (count + records); records use the
/// framing in [`record`](super::record).
pub struct WriteAheadLog {
    /// Path to the WAL file on disk.
    path: PathBuf,
    /// File handle opened for appending.
    file: File,
    /// Bytes of complete batches in the file.
    len: u64,
}

/// Outcome of replaying a WAL file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Complete batches replayed.
    pub batches: usize,
    /// Mutations replayed across all batches.
    pub mutations: usize,
    /// Trailing bytes dropped (torn or corrupt tail).
    pub discarded_bytes: u64,
}

impl WriteAheadLog {
    /// Open or create a WAL file at the specified path.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { path, file, len })
    }

    /// Returns the path to the WAL file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Encode a batch into the binary WAL format.
    fn encode_batch(mutations: &[Mutation]) -> Vec<u8> {
        let body: usize = mutations.iter().map(record::encoded_len).sum();
        let mut payload = Vec::with_capacity(4 + body);
        payload.put_u32_le(mutations.len() as u32);
        for mutation in mutations {
            record::encode_into(&mut payload, mutation);
        }

        let mut buf = Vec::with_capacity(BATCH_HEADER_LEN + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.put_u32_le(crc32fast::hash(&payload));
        buf.extend_from_slice(&payload);
        buf
    }

    /// Append a batch to the WAL, fsyncing when `sync` is set.
    /// A failed append is rolled back so later batches stay readable.
    pub fn append_batch(&mut self, mutations: &[Mutation], sync: bool) -> Result<()> {
        let encoded = Self::encode_batch(mutations);
        let result = self
            .file
            .write_all(&encoded)
            .and_then(|_| if sync { self.file.sync_data() } else { Ok(()) });

        if let Err(e) = result {
            if let Err(rollback) = self.file.set_len(self.len) {
                log::error!("WAL rollback to {} bytes failed: {}", self.len, rollback);
            }
            return Err(e.into());
        }
        self.len += encoded.len() as u64;
        Ok(())
    }

    /// Force previously appended batches to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Truncate the WAL file (called after a successful flush to a table).
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        Ok(())
    }

    /// Replay the WAL at `path` into a fresh MemTable.
    ///
    /// Replay stops at the first incomplete or checksum-failing batch;
    /// everything before it is recovered and the file is cut back to that
    /// point. A missing file recovers nothing.
    pub fn recover(path: &Path) -> Result<(MemTable, RecoveryStats)> {
        let mut memtable = MemTable::new();
        let mut stats = RecoveryStats::default();

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((memtable, stats)),
            Err(e) => return Err(e.into()),
        };

        let mut cursor = data.as_slice();
        while cursor.remaining() >= BATCH_HEADER_LEN {
            let mut header = &cursor[..BATCH_HEADER_LEN];
            let payload_len = header.get_u32_le() as usize;
            let crc = header.get_u32_le();

            let frame_len = BATCH_HEADER_LEN + payload_len;
            if cursor.remaining() < frame_len {
                break;
            }
            let payload = &cursor[BATCH_HEADER_LEN..frame_len];
            if crc32fast::hash(payload) != crc {
                log::warn!("WAL batch checksum mismatch in {:?}, dropping tail", path);
                break;
            }

            let mutations = Self::decode_payload(payload)?;
            memtable.apply_batch(&mutations);
            stats.mutations += mutations.len();
            stats.batches += 1;
            cursor.advance(frame_len);
        }

        stats.discarded_bytes = cursor.remaining() as u64;
        if stats.discarded_bytes > 0 {
            log::warn!(
                "WAL {:?}: discarded {} trailing bytes of an incomplete batch",
                path,
                stats.discarded_bytes
            );
            // New batches must not land behind the dropped tail.
            let valid_len = (data.len() - cursor.remaining()) as u64;
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }
        Ok((memtable, stats))
    }

    fn decode_payload(payload: &[u8]) -> Result<Vec<Mutation>> {
        let mut cursor = payload;
        if cursor.remaining() < 4 {
            return Err(VeilError::RecoveryFailed("batch payload too short".into()));
        }
        let count = cursor.get_u32_le() as usize;
        let mut mutations = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let (mutation, used) = record::decode(cursor, true)
                .map_err(|e| VeilError::RecoveryFailed(e.to_string()))?;
            mutations.push(mutation);
            cursor.advance(used);
        }
        if cursor.has_remaining() {
            return Err(VeilError::RecoveryFailed(
                "trailing bytes inside batch payload".into(),
            ));
        }
        Ok(mutations)
    }
}
