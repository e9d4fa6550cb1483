//! Configuration for nvwal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{NvError, Result};

/// Main configuration for an nvwal engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Region Configuration
    // -------------------------------------------------------------------------
    /// Backing store of the NVRAM region: a regular file or a DAX device
    /// such as `/dev/dax0.0`. Created and sized on first open.
    pub region_path: PathBuf,

    /// Size of the region in bytes. Fixed for the lifetime of the region.
    pub region_size: u64,

    /// How flushed ranges reach the persistence domain
    pub persist_mode: PersistMode,

    // -------------------------------------------------------------------------
    // Registry Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the table directory, fixed when the region is formatted
    pub max_tables: u32,
}

/// Persistence strategy for flushed ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// Cache-line flush + store fence only. Correct on real persistent
    /// memory mapped with DAX, where the CPU cache is the last volatile hop.
    CacheLine,

    /// Cache-line flush + fence, then `msync` of the touched pages.
    /// Required for regular files, whose pages sit in the page cache.
    Msync,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region_path: PathBuf::from("./nvwal.img"),
            region_size: 64 * 1024 * 1024, // 64 MB
            persist_mode: PersistMode::Msync,
            max_tables: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Region size in bytes for a size given in MiB
    pub fn mib_to_bytes(mib: u64) -> Result<u64> {
        mib.checked_mul(1024 * 1024).ok_or_else(|| {
            NvError::Config(format!("region size of {} MiB does not fit in 64 bits", mib))
        })
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the region backing file or device
    pub fn region_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.region_path = path.into();
        self
    }

    /// Set the region size (in bytes)
    pub fn region_size(mut self, size: u64) -> Self {
        self.config.region_size = size;
        self
    }

    /// Set the persistence mode
    pub fn persist_mode(mut self, mode: PersistMode) -> Self {
        self.config.persist_mode = mode;
        self
    }

    /// Set the table directory capacity
    pub fn max_tables(mut self, count: u32) -> Self {
        self.config.max_tables = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
