//! Table Registry
//!
//! Maps table ids to their WAL tables.
//!
//! The persisted side is a fixed-capacity directory of `u64` slots right
//! after the superblock, each holding the offset of a table record or 0.
//! The volatile side is a map rebuilt from the directory at startup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::alloc::FreeSpaceManager;
use crate::error::{NvError, Result};
use crate::region::{NvMemory, Superblock};
use crate::wal::{recover_table, TableRecovery, WalTable, TABLE_RECORD_SIZE};

/// Registry of the tables of one region
///
/// ## Concurrency:
/// - Lookups take the read lock and clone the table's `Arc`
/// - Creation holds the write lock across the duplicate/capacity checks,
///   the record allocation and the directory store
pub struct TableRegistry {
    region: Arc<dyn NvMemory>,
    superblock: Superblock,
    state: RwLock<RegistryState>,
}

struct RegistryState {
    tables: HashMap<i32, Arc<WalTable>>,
    /// Mirror of the persisted directory
    slots: Vec<u64>,
}

impl TableRegistry {
    /// Rebuild the registry by scanning the persisted directory
    pub fn recover(
        region: Arc<dyn NvMemory>,
        superblock: Superblock,
    ) -> Result<(Self, Vec<TableRecovery>)> {
        let mut tables = HashMap::new();
        let mut slots = Vec::with_capacity(superblock.max_tables as usize);
        let mut reports = Vec::new();

        for index in 0..superblock.max_tables {
            let record = region.read_u64(superblock.slot_offset(index))?;
            slots.push(record);
            if record == 0 {
                continue;
            }

            if record < superblock.heap_start || record >= superblock.total_size {
                return Err(NvError::corrupt(format!(
                    "directory slot {} points outside the heap ({})",
                    index, record
                )));
            }

            let (table, report) = recover_table(&region, &superblock, record)?;
            if tables.contains_key(&report.table_id) {
                return Err(NvError::corrupt(format!(
                    "table {} is registered twice",
                    report.table_id
                )));
            }
            tables.insert(report.table_id, Arc::new(table));
            reports.push(report);
        }

        let registry = Self {
            region,
            superblock,
            state: RwLock::new(RegistryState { tables, slots }),
        };
        Ok((registry, reports))
    }

    /// Look up a table
    pub fn get(&self, table_id: i32) -> Result<Arc<WalTable>> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .cloned()
            .ok_or(NvError::UnknownTable(table_id))
    }

    /// Create, persist and register an empty table
    ///
    /// If publishing the record fails and the directory slot can be cleared
    /// again, the record's space is released.
    pub fn create(&self, table_id: i32, allocator: &FreeSpaceManager) -> Result<Arc<WalTable>> {
        let mut state = self.state.write();

        if state.tables.contains_key(&table_id) {
            return Err(NvError::DuplicateTable(table_id));
        }
        let index = state
            .slots
            .iter()
            .position(|&slot| slot == 0)
            .ok_or(NvError::RegistryFull {
                capacity: self.superblock.max_tables,
            })?;

        let table = Arc::new(WalTable::create(
            Arc::clone(&self.region),
            allocator,
            table_id,
        )?);

        // The record is durable; publishing it in the directory makes it live
        let slot = self.superblock.slot_offset(index as u32);
        if let Err(e) = self.region.atomic_store(slot, table.record_offset()) {
            if self.region.atomic_store(slot, 0).is_ok() {
                let taken = [(table.record_offset(), TABLE_RECORD_SIZE)];
                return Err(allocator.release_on_error(&taken, e));
            }
            // Still published: keep the mirror in step with the directory
            state.slots[index] = table.record_offset();
            state.tables.insert(table_id, table);
            return Err(e);
        }

        state.slots[index] = table.record_offset();
        state.tables.insert(table_id, Arc::clone(&table));

        tracing::debug!(table_id, slot = index, record = table.record_offset(), "created table");
        Ok(table)
    }

    /// Registered table ids, ascending
    pub fn table_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.state.read().tables.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.read().tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Directory capacity
    pub fn capacity(&self) -> u32 {
        self.superblock.max_tables
    }
}
