//! Memory-mapped region
//!
//! Binds the engine to a regular file or a DAX device for the lifetime of
//! the process. Offsets are resolved through the current mapping's base
//! pointer at use time; the base is never persisted.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};

use crate::config::PersistMode;
use crate::error::{NvError, Result};

use super::{check_bounds, check_word_aligned, persist, NvMemory};

/// A file or device mapped read/write, shared by all engine threads
pub struct MappedRegion {
    /// Keeps the mapping alive; all access goes through `base`
    mmap: MmapMut,
    /// Base of the mapping, valid while `mmap` lives
    base: *mut u8,
    /// Mapped length in bytes
    len: u64,
    /// Backing file (holds the exclusive lock)
    file: File,
    path: PathBuf,
    mode: PersistMode,
}

// SAFETY: the mapping is shared memory. Callers of `NvMemory` guarantee that
// concurrent writers touch disjoint ranges, and every access is bounds checked
// against `len`, so sharing the base pointer between threads is sound.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Open the region at `path`, creating and sizing it if it is new
    ///
    /// An existing non-empty backing store must already be exactly `size`
    /// bytes: the region is never resized.
    pub fn open(path: &Path, size: u64, mode: PersistMode) -> Result<Self> {
        if size == 0 {
            return Err(NvError::Config("region size must be non-zero".to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // One owning process per region
        file.try_lock_exclusive().map_err(|e| {
            NvError::Region(format!("failed to lock {}: {}", path.display(), e))
        })?;

        let current = file.metadata()?.len();
        if current == 0 {
            file.set_len(size)?;
        } else if current != size {
            return Err(NvError::Config(format!(
                "region {} is {} bytes, configured size is {}",
                path.display(),
                current,
                size
            )));
        }

        let len = usize::try_from(size)
            .map_err(|_| NvError::Config(format!("region size {} exceeds address space", size)))?;

        // SAFETY: the file is exclusively locked by this process, so nobody
        // else truncates or remaps it underneath us.
        let mut mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map_mut(&file)
                .map_err(|e| NvError::Region(format!("failed to map {}: {}", path.display(), e)))?
        };
        let base = mmap.as_mut_ptr();

        tracing::debug!(path = %path.display(), size, ?mode, "mapped region");

        Ok(Self {
            mmap,
            base,
            len: size,
            file,
            path: path.to_path_buf(),
            mode,
        })
    }

    /// Path of the backing file or device
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persistence mode in effect
    pub fn persist_mode(&self) -> PersistMode {
        self.mode
    }

    fn msync(&self, offset: u64, len: u64) -> Result<()> {
        if self.mode == PersistMode::Msync {
            self.mmap.flush_range(offset as usize, len as usize)?;
        }
        Ok(())
    }
}

impl NvMemory for MappedRegion {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len() as u64, self.len)?;
        // SAFETY: bounds checked above; the mapping outlives `self`.
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(offset as usize), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        check_bounds(offset, bytes.len() as u64, self.len)?;
        // SAFETY: bounds checked above; writers touch disjoint ranges.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        check_bounds(offset, len, self.len)?;
        // SAFETY: bounds checked above.
        unsafe {
            persist::flush_range(self.base.add(offset as usize), len as usize);
        }
        self.msync(offset, len)
    }

    fn atomic_store(&self, offset: u64, value: u64) -> Result<()> {
        check_word_aligned(offset)?;
        check_bounds(offset, 8, self.len)?;
        // SAFETY: in bounds and 8-byte aligned (the mapping is page aligned).
        unsafe {
            persist::atomic_store_u64(self.base.add(offset as usize) as *mut u64, value);
        }
        self.msync(offset, 8)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.mode == PersistMode::Msync {
            let _ = self.mmap.flush();
        }
        let _ = FileExt::unlock(&self.file);
    }
}
