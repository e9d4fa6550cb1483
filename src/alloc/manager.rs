//! Free-Space Manager
//!
//! First-fit allocator over an address-ordered free list kept inside the
//! region itself.
//!
//! ## Crash Safety
//! Every structural change is either a single atomic word store, or a
//! block header written and flushed before the one atomic store that links
//! it. The only change touching two words of a live block (merging a freed
//! range with both neighbours) goes through the redo record in the
//! superblock, which `init` replays.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NvError, Result};
use crate::region::superblock::{
    FREE_HEAD_OFFSET, PENDING_ARMED_OFFSET, PENDING_BLOCK_OFFSET, PENDING_NEXT_OFFSET,
    PENDING_SIZE_OFFSET,
};
use crate::region::{persist, NvMemory, Superblock};

use super::block::{aligned_size, BlockHeader, FreeBlock, BLOCK_HEADER_SIZE, GRANULE, NEXT_FIELD};

/// Manages the free space of one region
///
/// ## Concurrency:
/// - All allocator state lives in the region; `lock` serializes every
///   walk and mutation of the free list
/// - Callers on behalf of different tables contend only here
pub struct FreeSpaceManager {
    region: Arc<dyn NvMemory>,

    /// Geometry loaded or created by `init`
    superblock: Superblock,

    /// Serializes allocate/release (process-wide)
    lock: Mutex<()>,

    /// True if `init` formatted a fresh region
    formatted: bool,

    /// True if `init` replayed an interrupted merge
    replayed_pending: bool,
}

impl FreeSpaceManager {
    /// Load the allocator of a formatted region, or format a new one
    ///
    /// On a fresh region: one free block spanning the heap is written first,
    /// then the superblock (magic last). On an existing region: an armed
    /// redo record is replayed and the free list is validated.
    pub fn init(region: Arc<dyn NvMemory>, max_tables: u32) -> Result<Self> {
        let (superblock, formatted) = match Superblock::load(&*region)? {
            Some(sb) => {
                if sb.max_tables != max_tables {
                    tracing::warn!(
                        persisted = sb.max_tables,
                        configured = max_tables,
                        "region was formatted with a different table capacity; using persisted value"
                    );
                }
                (sb, false)
            }
            None => {
                let sb = Superblock::plan(region.len(), max_tables)?;
                let initial = BlockHeader {
                    size: (sb.heap_size() / GRANULE) * GRANULE,
                    next: 0,
                };
                initial.persist(&*region, sb.heap_start)?;
                sb.format(&*region)?;
                (sb, true)
            }
        };

        let mut manager = Self {
            region,
            superblock,
            lock: Mutex::new(()),
            formatted,
            replayed_pending: false,
        };

        manager.replayed_pending = manager.replay_pending()?;
        let blocks = manager.walk()?;

        tracing::info!(
            formatted,
            replayed_pending = manager.replayed_pending,
            free_blocks = blocks.len(),
            free_bytes = blocks.iter().map(|b| b.size).sum::<u64>(),
            "free-space manager ready"
        );

        Ok(manager)
    }

    /// Allocate `size` bytes, first fit
    ///
    /// Returns the offset of the block. The request is rounded up to the
    /// allocation granule.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(NvError::InvalidArgument(
                "allocation size must be non-zero".to_string(),
            ));
        }
        if size > self.capacity() {
            return Err(NvError::InvalidArgument(format!(
                "allocation of {} bytes exceeds heap capacity {}",
                size,
                self.capacity()
            )));
        }
        let need = aligned_size(size);

        let _guard = self.lock.lock();

        let mut link = FREE_HEAD_OFFSET;
        let mut cursor = self.region.read_u64(link)?;
        let mut largest_free = 0;

        while cursor != 0 {
            let header = BlockHeader::read(&*self.region, cursor)?;

            if header.size >= need {
                if header.size == need {
                    // Unlink the whole block
                    self.region.atomic_store(link, header.next)?;
                } else {
                    // Remainder first, then the link that publishes it
                    let rest = cursor + need;
                    BlockHeader {
                        size: header.size - need,
                        next: header.next,
                    }
                    .persist(&*self.region, rest)?;
                    self.region.atomic_store(link, rest)?;
                }

                tracing::trace!(offset = cursor, size = need, split = header.size > need, "allocated");
                return Ok(cursor);
            }

            largest_free = largest_free.max(header.size);
            link = cursor + NEXT_FIELD;
            cursor = self.successor(cursor, header.next)?;
        }

        Err(NvError::OutOfSpace {
            requested: need,
            largest_free,
        })
    }

    /// Return `[offset, offset + size)` to the free list, merging it with
    /// any address-adjacent free neighbour
    ///
    /// `size` is rounded exactly as `allocate` rounded it.
    pub fn release(&self, offset: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Err(NvError::InvalidArgument(
                "release size must be non-zero".to_string(),
            ));
        }
        let need = aligned_size(size);
        let in_heap = offset >= self.superblock.heap_start
            && offset % GRANULE == 0
            && offset
                .checked_add(need)
                .is_some_and(|end| end <= self.heap_end());
        if !in_heap {
            return Err(NvError::InvalidArgument(format!(
                "range at offset {} ({} bytes) is not an allocatable heap range",
                offset, need
            )));
        }

        let _guard = self.lock.lock();

        // Locate the neighbours: `prev` ends at or before `offset`,
        // `next` starts after it. Only they can overlap the range.
        let mut link = FREE_HEAD_OFFSET;
        let mut prev: Option<FreeBlock> = None;
        let mut next: Option<(FreeBlock, u64)> = None;
        let mut cursor = self.region.read_u64(link)?;

        while cursor != 0 {
            let header = BlockHeader::read(&*self.region, cursor)?;
            let block = FreeBlock {
                offset: cursor,
                size: header.size,
            };

            if block.overlaps(offset, need) {
                return Err(NvError::DoubleFree { offset, size: need });
            }
            if cursor > offset {
                next = Some((block, header.next));
                break;
            }

            prev = Some(block);
            link = cursor + NEXT_FIELD;
            cursor = self.successor(cursor, header.next)?;
        }

        let merge_prev = prev.filter(|p| p.end() == offset);
        let merge_next = next.filter(|(n, _)| offset + need == n.offset);

        match (merge_prev, merge_next) {
            (Some(p), Some((n, after))) => {
                self.apply_pending(p.offset, p.size + need + n.size, after)?;
            }
            (Some(p), None) => {
                // Growing the predecessor is a single-word change
                self.region.atomic_store(p.offset, p.size + need)?;
            }
            (None, Some((n, after))) => {
                BlockHeader {
                    size: need + n.size,
                    next: after,
                }
                .persist(&*self.region, offset)?;
                self.region.atomic_store(link, offset)?;
            }
            (None, None) => {
                BlockHeader {
                    size: need,
                    next: next.map(|(n, _)| n.offset).unwrap_or(0),
                }
                .persist(&*self.region, offset)?;
                self.region.atomic_store(link, offset)?;
            }
        }

        tracing::trace!(
            offset,
            size = need,
            merged_prev = merge_prev.is_some(),
            merged_next = merge_next.is_some(),
            "released"
        );
        Ok(())
    }

    /// Give back the blocks of an operation that failed before linking them
    ///
    /// Releases in reverse allocation order and hands `cause` back. A failed
    /// release is logged and leaves its block leaked.
    pub(crate) fn release_on_error(&self, taken: &[(u64, u64)], cause: NvError) -> NvError {
        for &(offset, size) in taken.iter().rev() {
            if let Err(e) = self.release(offset, size) {
                tracing::warn!(offset, size, error = %e, "could not return space after a failed write");
            }
        }
        cause
    }

    /// Shut the allocator down
    ///
    /// Every mutation is durable before it returns, so this only fences.
    pub fn shutdown(&self) -> Result<()> {
        let _guard = self.lock.lock();
        persist::store_fence();
        tracing::info!("free-space manager shut down");
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Snapshot of the free list in address order
    pub fn free_blocks(&self) -> Result<Vec<FreeBlock>> {
        let _guard = self.lock.lock();
        self.walk()
    }

    /// Total free bytes
    pub fn free_bytes(&self) -> Result<u64> {
        Ok(self.free_blocks()?.iter().map(|b| b.size).sum())
    }

    /// Size of the largest free block (largest satisfiable request)
    pub fn largest_free_block(&self) -> Result<u64> {
        Ok(self.free_blocks()?.iter().map(|b| b.size).max().unwrap_or(0))
    }

    /// Bytes managed by the allocator (free + allocated)
    pub fn capacity(&self) -> u64 {
        (self.superblock.heap_size() / GRANULE) * GRANULE
    }

    /// Total region size, metadata included
    pub fn total_size(&self) -> u64 {
        self.superblock.total_size
    }

    /// First allocatable offset
    pub fn heap_start(&self) -> u64 {
        self.superblock.heap_start
    }

    /// Region geometry
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// True if this `init` formatted the region
    pub fn was_formatted(&self) -> bool {
        self.formatted
    }

    /// True if this `init` completed an interrupted merge
    pub fn replayed_pending(&self) -> bool {
        self.replayed_pending
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn heap_end(&self) -> u64 {
        self.superblock.heap_start + self.capacity()
    }

    /// Follow a `next` link, refusing to go backwards (cycle guard)
    fn successor(&self, cursor: u64, next: u64) -> Result<u64> {
        if next != 0 && next <= cursor {
            return Err(NvError::corrupt(format!(
                "free list link from {} points back to {}",
                cursor, next
            )));
        }
        Ok(next)
    }

    /// Walk and validate the whole free list
    fn walk(&self) -> Result<Vec<FreeBlock>> {
        let heap_end = self.heap_end();
        let mut blocks = Vec::new();
        let mut floor = self.superblock.heap_start;
        let mut cursor = self.region.read_u64(FREE_HEAD_OFFSET)?;

        while cursor != 0 {
            if cursor < floor {
                return Err(NvError::corrupt(format!(
                    "free block at {} is out of order, overlapping, or part of a cycle",
                    cursor
                )));
            }
            if cursor % GRANULE != 0 || cursor + BLOCK_HEADER_SIZE > heap_end {
                return Err(NvError::corrupt(format!(
                    "free block at {} is misaligned or outside the heap",
                    cursor
                )));
            }

            let header = BlockHeader::read(&*self.region, cursor)?;
            if header.size < GRANULE
                || header.size % GRANULE != 0
                || header.size > heap_end - cursor
            {
                return Err(NvError::corrupt(format!(
                    "free block at {} has invalid size {}",
                    cursor, header.size
                )));
            }

            blocks.push(FreeBlock {
                offset: cursor,
                size: header.size,
            });
            floor = cursor + header.size;
            cursor = header.next;
        }

        Ok(blocks)
    }

    /// Update size and next of one block as a unit via the redo record
    fn apply_pending(&self, block: u64, size: u64, next: u64) -> Result<()> {
        self.region.write_u64(PENDING_BLOCK_OFFSET, block)?;
        self.region.write_u64(PENDING_SIZE_OFFSET, size)?;
        self.region.write_u64(PENDING_NEXT_OFFSET, next)?;
        self.region
            .flush_range(PENDING_BLOCK_OFFSET, PENDING_NEXT_OFFSET + 8 - PENDING_BLOCK_OFFSET)?;

        self.region.atomic_store(PENDING_ARMED_OFFSET, 1)?;
        self.finish_pending(block, size, next)
    }

    fn finish_pending(&self, block: u64, size: u64, next: u64) -> Result<()> {
        BlockHeader { size, next }.persist(&*self.region, block)?;
        self.region.atomic_store(PENDING_ARMED_OFFSET, 0)
    }

    /// Replay an armed redo record left by a crash
    fn replay_pending(&self) -> Result<bool> {
        match self.region.read_u64(PENDING_ARMED_OFFSET)? {
            0 => Ok(false),
            1 => {
                let block = self.region.read_u64(PENDING_BLOCK_OFFSET)?;
                let size = self.region.read_u64(PENDING_SIZE_OFFSET)?;
                let next = self.region.read_u64(PENDING_NEXT_OFFSET)?;

                let heap_end = self.heap_end();
                let valid = block >= self.superblock.heap_start
                    && block % GRANULE == 0
                    && size >= GRANULE
                    && size % GRANULE == 0
                    && block.checked_add(size).is_some_and(|end| end <= heap_end)
                    && (next == 0 || next >= block + size);
                if !valid {
                    return Err(NvError::corrupt(format!(
                        "pending free-list update is invalid (block {}, size {}, next {})",
                        block, size, next
                    )));
                }

                tracing::warn!(block, size, next, "replaying interrupted free-list merge");
                self.finish_pending(block, size, next)?;
                Ok(true)
            }
            other => Err(NvError::corrupt(format!(
                "pending free-list flag has invalid value {}",
                other
            ))),
        }
    }
}
