//! Free-Space Allocator Module
//!
//! Tracks the unallocated byte ranges of the region heap as a free list
//! rooted in the superblock, kept in ascending address order.
//!
//! ## Responsibilities
//! - First-fit allocation with block splitting
//! - Release with mandatory coalescing of address-adjacent blocks
//! - Double-free detection before any link is written

mod block;
mod manager;

pub use block::{aligned_size, FreeBlock, BLOCK_HEADER_SIZE, GRANULE};
pub use manager::FreeSpaceManager;
