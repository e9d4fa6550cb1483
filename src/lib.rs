//! # nvwal
//!
//! A persistent-memory storage engine with:
//! - Per-table write-ahead logs living directly in an NVRAM region
//! - Crash-consistent updates ordered by cache-line flushes and fences
//! - A coalescing first-fit allocator whose free list is itself persistent
//! - Offset-based links, so the region may be mapped at any address
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │   create_table / put_row / delete_row / scan / advance_commit│
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!        ┌───────────────┐              ┌───────────────┐
//!        │ TableRegistry │─────────────►│   WalTable    │
//!        │  (directory)  │              │ (per-table    │
//!        └───────┬───────┘              │  mutex)       │
//!                │                      └───────┬───────┘
//!                ▼                              ▼
//!        ┌─────────────────────────────────────────────┐
//!        │           FreeSpaceManager (mutex)           │
//!        └──────────────────────┬──────────────────────┘
//!                               ▼
//!        ┌─────────────────────────────────────────────┐
//!        │  NvMemory: MappedRegion | SimulatedRegion   │
//!        │  read / write / flush_range / atomic_store  │
//!        └─────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod region;
pub mod alloc;
pub mod wal;
pub mod registry;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NvError, Result};
pub use config::{Config, PersistMode};
pub use engine::{Engine, RecoveryReport, RowScan, ScannedRow};
pub use region::{MappedRegion, NvMemory, SimulatedRegion};
pub use wal::Op;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of nvwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
