//! Persistence primitives
//!
//! Cache-line flush, store fence and a tear-free 8-byte store. These operate
//! on raw pointers into a mapping; `MappedRegion` is the only caller and is
//! responsible for bounds and alignment.

/// Size of a CPU cache line on every target we flush on
pub const CACHE_LINE: usize = 64;

/// Flush every cache line touching `[start, start + len)`, then fence.
///
/// # Safety
/// `start..start + len` must lie inside a live mapping.
pub unsafe fn flush_range(start: *const u8, len: usize) {
    let end = start as usize + len;
    let mut line = (start as usize) & !(CACHE_LINE - 1);
    while line < end {
        flush_line(line as *const u8);
        line += CACHE_LINE;
    }
    store_fence();
}

/// Store `value` into `dest` in a single non-temporal instruction, then fence.
///
/// # Safety
/// `dest` must be 8-byte aligned and point inside a live mapping.
pub unsafe fn atomic_store_u64(dest: *mut u64, value: u64) {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::x86_64::_mm_stream_si64(dest as *mut i64, value as i64);
        store_fence();
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        use std::sync::atomic::{AtomicU64, Ordering};
        AtomicU64::from_ptr(dest).store(value, Ordering::SeqCst);
        store_fence();
    }
}

/// Order all earlier stores (including flushes) before any later store
#[inline]
pub fn store_fence() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: sfence has no memory operands; SSE is baseline on x86_64.
    unsafe {
        std::arch::x86_64::_mm_sfence();
    }

    #[cfg(not(target_arch = "x86_64"))]
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

#[cfg(target_arch = "x86_64")]
#[inline]
unsafe fn flush_line(line: *const u8) {
    std::arch::x86_64::_mm_clflush(line);
}

// No user-space flush instruction here; durability comes from msync.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
unsafe fn flush_line(_line: *const u8) {}

/// Round `offset` down to its cache line
pub(crate) fn line_floor(offset: u64) -> u64 {
    offset & !(CACHE_LINE as u64 - 1)
}

/// Round `offset` up to the next cache line boundary
pub(crate) fn line_ceil(offset: u64) -> u64 {
    (offset + CACHE_LINE as u64 - 1) & !(CACHE_LINE as u64 - 1)
}
