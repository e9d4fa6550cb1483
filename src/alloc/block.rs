//! Free block header
//!
//! A free range stores its own header in its first 16 bytes:
//!
//! ```text
//! ┌───────────┬───────────┐
//! │ Size (8)  │ Next (8)  │   Next = offset of next free block, 0 = end
//! └───────────┴───────────┘
//! ```

use crate::error::Result;
use crate::region::{get_u64, NvMemory};

/// Size of an on-region free block header
pub const BLOCK_HEADER_SIZE: u64 = 16;

/// Allocation granule; every block offset and size is a multiple of it
pub const GRANULE: u64 = BLOCK_HEADER_SIZE;

/// Offset of the `next` field inside a block header
pub(crate) const NEXT_FIELD: u64 = 8;

/// A free range of the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub offset: u64,
    pub size: u64,
}

impl FreeBlock {
    /// First byte past this block
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// True if `[offset, offset + size)` intersects this block
    pub fn overlaps(&self, offset: u64, size: u64) -> bool {
        offset < self.end() && self.offset < offset + size
    }
}

/// Round a request up to the allocation granule
pub fn aligned_size(size: u64) -> u64 {
    size.div_ceil(GRANULE).saturating_mul(GRANULE)
}

/// Header as read from the region
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHeader {
    pub size: u64,
    pub next: u64,
}

impl BlockHeader {
    pub fn read(region: &dyn NvMemory, offset: u64) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        region.read(offset, &mut buf)?;
        Ok(Self {
            size: get_u64(&buf, 0),
            next: get_u64(&buf, 8),
        })
    }

    /// Write and flush a header (block content, before any link to it)
    pub fn persist(&self, region: &dyn NvMemory, offset: u64) -> Result<()> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.next.to_le_bytes());
        region.durably_write(offset, &buf)
    }
}
