//! Superblock
//!
//! Fixed header at offset 0 of every region.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Header (line 0, immutable after format)                    │
//! │   Magic (8) | Version (4) | MaxTables (4) | TotalSize (8)   │
//! │   DirectoryOffset (8) | HeapStart (8) | HeaderCRC (4)      │
//! ├────────────────────────────────────────────────────────────┤
//! │ Allocator words (line 1, updated with atomic stores)       │
//! │   FreeHead (8) | PendingArmed (8) | PendingBlock (8)       │
//! │   PendingSize (8) | PendingNext (8)                        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The magic is written and flushed last when formatting, so a region
//! whose format was interrupted is simply formatted again.

use crate::error::{NvError, Result};

use super::persist::line_ceil;
use super::{get_u32, get_u64, NvMemory};

/// Magic identifying a formatted region ("NVWALRG1")
pub const MAGIC: u64 = u64::from_le_bytes(*b"NVWALRG1");

/// On-region format version
pub const VERSION: u32 = 1;

/// Superblock size; the table directory starts right after it
pub const SUPERBLOCK_SIZE: u64 = 128;

/// Bytes covered by the header CRC
const HEADER_CRC_SPAN: usize = 40;

// Allocator words
pub(crate) const FREE_HEAD_OFFSET: u64 = 64;
pub(crate) const PENDING_ARMED_OFFSET: u64 = 72;
pub(crate) const PENDING_BLOCK_OFFSET: u64 = 80;
pub(crate) const PENDING_SIZE_OFFSET: u64 = 88;
pub(crate) const PENDING_NEXT_OFFSET: u64 = 96;

/// Smallest heap worth formatting
const MIN_HEAP_SIZE: u64 = 64;

/// Immutable geometry of a formatted region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub total_size: u64,
    pub max_tables: u32,
    pub directory_offset: u64,
    pub heap_start: u64,
}

impl Superblock {
    /// Compute the geometry for a new region (no I/O)
    pub fn plan(total_size: u64, max_tables: u32) -> Result<Self> {
        if max_tables == 0 {
            return Err(NvError::Config("max_tables must be at least 1".to_string()));
        }

        let directory_offset = SUPERBLOCK_SIZE;
        let heap_start = line_ceil(directory_offset + 8 * max_tables as u64);

        if total_size < heap_start + MIN_HEAP_SIZE {
            return Err(NvError::Config(format!(
                "region of {} bytes is too small: metadata needs {} bytes plus a heap of at least {}",
                total_size, heap_start, MIN_HEAP_SIZE
            )));
        }

        Ok(Self {
            total_size,
            max_tables,
            directory_offset,
            heap_start,
        })
    }

    /// Load the superblock of a formatted region
    ///
    /// Returns `Ok(None)` when the magic is absent (never formatted, or the
    /// format did not complete). A present magic with an invalid header is
    /// corruption.
    pub fn load(region: &dyn NvMemory) -> Result<Option<Self>> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(NvError::Config(format!(
                "region of {} bytes cannot hold a superblock",
                region.len()
            )));
        }

        let mut header = [0u8; 48];
        region.read(0, &mut header)?;

        let magic = get_u64(&header, 0);
        if magic != MAGIC {
            return Ok(None);
        }

        let stored_crc = get_u32(&header, 40);
        if crc32fast::hash(&header[..HEADER_CRC_SPAN]) != stored_crc {
            return Err(NvError::corrupt("superblock header checksum mismatch"));
        }

        let version = get_u32(&header, 8);
        if version != VERSION {
            return Err(NvError::corrupt(format!(
                "unsupported region version {}",
                version
            )));
        }

        let max_tables = get_u32(&header, 12);
        let total_size = get_u64(&header, 16);
        let directory_offset = get_u64(&header, 24);
        let heap_start = get_u64(&header, 32);

        if total_size != region.len() {
            return Err(NvError::corrupt(format!(
                "superblock records {} bytes but region is {} bytes",
                total_size,
                region.len()
            )));
        }

        let expected = Self::plan(total_size, max_tables)
            .map_err(|e| NvError::corrupt(format!("superblock geometry invalid: {}", e)))?;
        if expected.directory_offset != directory_offset || expected.heap_start != heap_start {
            return Err(NvError::corrupt("superblock geometry does not match its table capacity"));
        }

        Ok(Some(expected))
    }

    /// Write a fresh superblock
    ///
    /// The caller has already written and flushed the initial free block at
    /// `heap_start`. Order: header body, empty directory and allocator words,
    /// then the magic.
    pub fn format(&self, region: &dyn NvMemory) -> Result<()> {
        let mut header = [0u8; 48];
        header[0..8].copy_from_slice(&MAGIC.to_le_bytes());
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&self.max_tables.to_le_bytes());
        header[16..24].copy_from_slice(&self.total_size.to_le_bytes());
        header[24..32].copy_from_slice(&self.directory_offset.to_le_bytes());
        header[32..40].copy_from_slice(&self.heap_start.to_le_bytes());
        let crc = crc32fast::hash(&header[..HEADER_CRC_SPAN]);
        header[40..44].copy_from_slice(&crc.to_le_bytes());

        // Everything but the magic first
        region.durably_write(8, &header[8..])?;

        let directory = vec![0u8; 8 * self.max_tables as usize];
        region.durably_write(self.directory_offset, &directory)?;

        let mut words = [0u8; (SUPERBLOCK_SIZE - FREE_HEAD_OFFSET) as usize];
        words[0..8].copy_from_slice(&self.heap_start.to_le_bytes());
        region.durably_write(FREE_HEAD_OFFSET, &words)?;

        // Visibility
        region.atomic_store(0, MAGIC)?;

        tracing::info!(
            total_size = self.total_size,
            max_tables = self.max_tables,
            heap_start = self.heap_start,
            "formatted region"
        );
        Ok(())
    }

    /// Bytes managed by the allocator
    pub fn heap_size(&self) -> u64 {
        self.total_size - self.heap_start
    }

    /// Offset of directory slot `index`
    pub fn slot_offset(&self, index: u32) -> u64 {
        self.directory_offset + 8 * index as u64
    }
}
