//! Error types for nvwal
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using NvError
pub type Result<T> = std::result::Result<T, NvError>;

/// Unified error type for nvwal operations
#[derive(Debug, Error)]
pub enum NvError {
    // -------------------------------------------------------------------------
    // I/O and Region Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Region error: {0}")]
    Region(String),

    #[error("Access out of bounds: offset {offset} + len {len} exceeds region of {region_len} bytes")]
    OutOfBounds { offset: u64, len: u64, region_len: u64 },

    // -------------------------------------------------------------------------
    // Allocator Errors
    // -------------------------------------------------------------------------
    #[error("Out of space: requested {requested} bytes, largest free block is {largest_free} bytes")]
    OutOfSpace { requested: u64, largest_free: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Double free: range at offset {offset} ({size} bytes) overlaps a free block")]
    DoubleFree { offset: u64, size: u64 },

    // -------------------------------------------------------------------------
    // Registry Errors
    // -------------------------------------------------------------------------
    #[error("Unknown table: {0}")]
    UnknownTable(i32),

    #[error("Table already exists: {0}")]
    DuplicateTable(i32),

    #[error("Table registry full (capacity {capacity})")]
    RegistryFull { capacity: u32 },

    // -------------------------------------------------------------------------
    // Recovery Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt persistent state: {0}")]
    CorruptPersistentState(String),

    // -------------------------------------------------------------------------
    // Lifecycle and Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NvError {
    /// Shorthand for building a `CorruptPersistentState` error
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        NvError::CorruptPersistentState(msg.into())
    }
}
