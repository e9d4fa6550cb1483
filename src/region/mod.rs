//! Region Module
//!
//! The NVRAM region and the only code allowed to touch its bytes: the
//! `NvMemory` trait, its mapped and simulated implementations, and the
//! superblock at offset 0. The table directory follows the superblock and
//! the allocator heap starts on the next cache line.
//!
//! Nothing stored in the region is an absolute address. Every link is an
//! offset from the region start, and offset 0 (the superblock) means "none".

mod mapped;
pub mod persist;
mod simulated;
pub(crate) mod superblock;

pub use mapped::MappedRegion;
pub use simulated::SimulatedRegion;
pub use superblock::{Superblock, SUPERBLOCK_SIZE};

use crate::error::{NvError, Result};

/// Byte-addressable persistent memory
///
/// Implementations may be shared between threads. Callers guarantee that
/// concurrent writers touch disjoint ranges (the allocator hands out
/// disjoint blocks and every shared structure is guarded by a mutex).
pub trait NvMemory: Send + Sync {
    /// Region length in bytes
    fn len(&self) -> u64;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Plain (not yet durable) write of `bytes` at `offset`
    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Make `[offset, offset + len)` durable, ordered after every earlier store
    fn flush_range(&self, offset: u64, len: u64) -> Result<()>;

    /// Durable tear-free store of an 8-byte aligned word
    fn atomic_store(&self, offset: u64, value: u64) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_u64(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u64(&self, offset: u64, value: u64) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Write then flush: once this returns the bytes survive a crash
    fn durably_write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.write(offset, bytes)?;
        self.flush_range(offset, bytes.len() as u64)
    }
}

/// Shared bounds check for region implementations
pub(crate) fn check_bounds(offset: u64, len: u64, region_len: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= region_len => Ok(()),
        _ => Err(NvError::OutOfBounds {
            offset,
            len,
            region_len,
        }),
    }
}

/// Shared alignment check for `atomic_store`
pub(crate) fn check_word_aligned(offset: u64) -> Result<()> {
    if offset % 8 != 0 {
        return Err(NvError::InvalidArgument(format!(
            "atomic store at unaligned offset {}",
            offset
        )));
    }
    Ok(())
}

/// Little-endian `u64` at `at` in a decoded buffer
pub(crate) fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}

/// Little-endian `u32` at `at` in a decoded buffer
pub(crate) fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}
