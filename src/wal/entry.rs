//! WAL Entry definitions
//!
//! Defines the on-region layout of individual WAL log entries.
//!
//! ```text
//! ┌─────────┬────────────┬──────────┬──────────┬────────┬─────────┬──────────┬─────────┐
//! │ Key (8) │ DataOff (8)│ DataLen  │ Next (8) │ Op (1) │ Pad (3) │ DataCRC  │ EntryCRC│
//! │  i64    │    u64     │ u64 (8)  │   u64    │        │         │ u32 (4)  │ u32 (4) │
//! └─────────┴────────────┴──────────┴──────────┴────────┴─────────┴──────────┴─────────┘
//! ```
//!
//! `EntryCRC` covers every field except `Next`, the only field written after
//! the entry is published.

use crate::error::{NvError, Result};
use crate::region::{get_u32, get_u64, NvMemory};

/// Bytes allocated per entry (44 used, padded to the allocation granule)
pub const ENTRY_SIZE: u64 = 48;

/// Offset of the `next` link inside an entry
pub(crate) const NEXT_FIELD: u64 = 24;

/// The mutation an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// A row was written
    Insert = 1,

    /// A row was deleted (no payload)
    Delete = 2,
}

impl Op {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Op::Insert),
            2 => Some(Op::Delete),
            _ => None,
        }
    }
}

/// A single entry in a table's log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Opaque row key
    pub key: i64,

    /// The operation logged
    pub op: Op,

    /// Region offset of the row payload (0 for deletes)
    pub data_offset: u64,

    /// Payload length in bytes (0 for deletes)
    pub data_size: u64,

    /// CRC32 of the payload bytes
    pub payload_crc: u32,

    /// Offset of the next entry, if one has been linked
    pub next: Option<u64>,
}

impl WalEntry {
    /// New unlinked entry for an insert of `payload` stored at `data_offset`
    pub fn insert(key: i64, data_offset: u64, payload: &[u8]) -> Self {
        Self {
            key,
            op: Op::Insert,
            data_offset,
            data_size: payload.len() as u64,
            payload_crc: crc32fast::hash(payload),
            next: None,
        }
    }

    /// New unlinked delete entry
    pub fn delete(key: i64) -> Self {
        Self {
            key,
            op: Op::Delete,
            data_offset: 0,
            data_size: 0,
            payload_crc: crc32fast::hash(&[]),
            next: None,
        }
    }

    /// Encode to the on-region layout
    pub fn encode(&self) -> [u8; ENTRY_SIZE as usize] {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.key.to_le_bytes());
        buf[8..16].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.next.unwrap_or(0).to_le_bytes());
        buf[32] = self.op as u8;
        buf[36..40].copy_from_slice(&self.payload_crc.to_le_bytes());
        let crc = Self::content_crc(&buf);
        buf[40..44].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode and verify an entry read from `offset`
    pub fn decode(buf: &[u8; ENTRY_SIZE as usize], offset: u64) -> Result<Self> {
        let stored_crc = get_u32(buf, 40);
        if Self::content_crc(buf) != stored_crc {
            return Err(NvError::corrupt(format!(
                "WAL entry at {} fails its checksum",
                offset
            )));
        }

        let op = Op::from_byte(buf[32]).ok_or_else(|| {
            NvError::corrupt(format!("WAL entry at {} has unknown op {}", offset, buf[32]))
        })?;

        let next = get_u64(buf, NEXT_FIELD as usize);

        Ok(Self {
            key: get_u64(buf, 0) as i64,
            op,
            data_offset: get_u64(buf, 8),
            data_size: get_u64(buf, 16),
            payload_crc: get_u32(buf, 36),
            next: (next != 0).then_some(next),
        })
    }

    /// Read and verify the entry stored at `offset`
    pub fn read(region: &dyn NvMemory, offset: u64) -> Result<Self> {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        region.read(offset, &mut buf)?;
        Self::decode(&buf, offset)
    }

    /// Checksum over everything but `next` and the checksum itself
    fn content_crc(buf: &[u8; ENTRY_SIZE as usize]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[0..24]);
        hasher.update(&buf[32..40]);
        hasher.finalize()
    }
}
