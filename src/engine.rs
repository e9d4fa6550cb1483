//! Engine Module
//!
//! The caller-facing façade that owns a region and coordinates all
//! components.
//!
//! ## Responsibilities
//! - Initialize the allocator and recover the table registry on open
//! - Row-level API: create_table / put_row / delete_row / scan / advance_commit
//! - Reject every call after `shutdown` with `NotInitialized`

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::alloc::{FreeBlock, FreeSpaceManager};
use crate::config::Config;
use crate::error::{NvError, Result};
use crate::region::{MappedRegion, NvMemory};
use crate::registry::TableRegistry;
use crate::wal::{LogCursor, Op, TablePointers, TableRecovery};

/// What engine initialization found and repaired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// The region had no valid superblock and was formatted
    pub formatted: bool,

    /// An interrupted free-list merge was replayed
    pub replayed_free_list_update: bool,

    /// One entry per recovered table, in directory order
    pub tables: Vec<TableRecovery>,
}

/// One row mutation as returned by `scan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRow {
    pub key: i64,
    pub op: Op,
    /// Row payload (empty for deletes)
    pub payload: Bytes,
    /// Covered by the last `advance_commit`
    pub committed: bool,
}

/// Lazy scan over a table's log, resolving payloads as it goes
#[derive(Clone)]
pub struct RowScan {
    cursor: LogCursor,
    region: Arc<dyn NvMemory>,
}

impl RowScan {
    /// Restart from the first entry
    pub fn rewind(&mut self) {
        self.cursor.rewind();
    }
}

impl Iterator for RowScan {
    type Item = Result<ScannedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.cursor.next()?;
        Some(record.and_then(|record| {
            let payload = record.read_payload(&*self.region)?;
            Ok(ScannedRow {
                key: record.key,
                op: record.op,
                payload: Bytes::from(payload),
                committed: record.committed,
            })
        }))
    }
}

/// State created on open and torn down by `shutdown`
struct EngineState {
    region: Arc<dyn NvMemory>,
    allocator: FreeSpaceManager,
    registry: TableRegistry,
    recovery: RecoveryReport,
}

/// The persistent-memory storage engine
///
/// ## Concurrency Model
///
/// - Every operation clones the state `Arc` under a short read lock and
///   then runs without the engine lock
/// - Appends and commits on one table serialize on that table's mutex;
///   different tables do not contend
/// - `allocate`/`release` serialize on the allocator's process-wide mutex
/// - `shutdown` takes the state out; operations already running finish on
///   their own `Arc`, later ones see `NotInitialized`
pub struct Engine {
    state: RwLock<Option<Arc<EngineState>>>,
}

impl Engine {
    /// Map the configured region and initialize the engine
    pub fn open(config: Config) -> Result<Self> {
        let region = MappedRegion::open(
            &config.region_path,
            config.region_size,
            config.persist_mode,
        )?;
        Self::with_region(Arc::new(region), &config)
    }

    /// Initialize the engine on an already bound region
    ///
    /// On startup:
    /// 1. Load (or format) the superblock and free list
    /// 2. Replay an interrupted free-list merge, validate the free list
    /// 3. Rebuild the table registry, recovering every table
    pub fn with_region(region: Arc<dyn NvMemory>, config: &Config) -> Result<Self> {
        // Steps 1-2: allocator
        let allocator = FreeSpaceManager::init(Arc::clone(&region), config.max_tables)?;

        // Step 3: tables
        let (registry, tables) = TableRegistry::recover(Arc::clone(&region), *allocator.superblock())?;

        let recovery = RecoveryReport {
            formatted: allocator.was_formatted(),
            replayed_free_list_update: allocator.replayed_pending(),
            tables,
        };

        tracing::info!(
            formatted = recovery.formatted,
            tables = recovery.tables.len(),
            region_size = region.len(),
            "engine initialized"
        );

        Ok(Self {
            state: RwLock::new(Some(Arc::new(EngineState {
                region,
                allocator,
                registry,
                recovery,
            }))),
        })
    }

    /// Create an empty table
    pub fn create_table(&self, table_id: i32) -> Result<()> {
        let state = self.state()?;
        state.registry.create(table_id, &state.allocator)?;
        Ok(())
    }

    /// Store `payload` and log an insert of `key`
    ///
    /// Returns the region offset of the stored payload.
    pub fn put_row(&self, table_id: i32, key: i64, payload: &[u8]) -> Result<u64> {
        let state = self.state()?;
        let table = state.registry.get(table_id)?;
        let appended = table.append(&state.allocator, key, payload, Op::Insert)?;

        appended.data_offset.ok_or_else(|| {
            NvError::InvalidArgument(format!("insert of key {} stored no payload", key))
        })
    }

    /// Log a delete of `key`
    ///
    /// The deleted row's payload is not reclaimed; the log records history.
    pub fn delete_row(&self, table_id: i32, key: i64) -> Result<()> {
        let state = self.state()?;
        let table = state.registry.get(table_id)?;
        table.append(&state.allocator, key, &[], Op::Delete)?;
        Ok(())
    }

    /// Acknowledge everything appended so far as committed
    pub fn advance_commit(&self, table_id: i32) -> Result<()> {
        let state = self.state()?;
        state.registry.get(table_id)?.advance_commit()?;
        Ok(())
    }

    /// Lazy scan of `(key, op, payload, committed)` in append order
    pub fn scan(&self, table_id: i32) -> Result<RowScan> {
        let state = self.state()?;
        let table = state.registry.get(table_id)?;
        Ok(RowScan {
            cursor: table.read_all(),
            region: Arc::clone(&state.region),
        })
    }

    /// Lazy walk over raw log records (payloads not read)
    pub fn read_all(&self, table_id: i32) -> Result<LogCursor> {
        let state = self.state()?;
        Ok(state.registry.get(table_id)?.read_all())
    }

    /// Tear the engine down; every later call returns `NotInitialized`
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state.write().take().ok_or(NvError::NotInitialized)?;
        state.allocator.shutdown()?;
        tracing::info!(tables = state.registry.len(), "engine shut down");
        Ok(())
    }

    // =========================================================================
    // Accessors (for tools, testing and debugging)
    // =========================================================================

    /// True until `shutdown`
    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Registered table ids, ascending
    pub fn table_ids(&self) -> Result<Vec<i32>> {
        Ok(self.state()?.registry.table_ids())
    }

    /// Head/tail/commit of a table
    pub fn table_pointers(&self, table_id: i32) -> Result<TablePointers> {
        Ok(self.state()?.registry.get(table_id)?.pointers())
    }

    /// Free list in address order
    pub fn free_blocks(&self) -> Result<Vec<FreeBlock>> {
        self.state()?.allocator.free_blocks()
    }

    /// Total free bytes
    pub fn free_bytes(&self) -> Result<u64> {
        self.state()?.allocator.free_bytes()
    }

    /// Bytes managed by the allocator
    pub fn capacity(&self) -> Result<u64> {
        Ok(self.state()?.allocator.capacity())
    }

    /// Table directory capacity
    pub fn max_tables(&self) -> Result<u32> {
        Ok(self.state()?.registry.capacity())
    }

    /// What happened during initialization
    pub fn recovery_report(&self) -> Result<RecoveryReport> {
        Ok(self.state()?.recovery.clone())
    }

    fn state(&self) -> Result<Arc<EngineState>> {
        self.state.read().clone().ok_or(NvError::NotInitialized)
    }
}
