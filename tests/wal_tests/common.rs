//! Shared helpers for WAL tests

use std::sync::Arc;

use nvwal::alloc::FreeSpaceManager;
use nvwal::registry::TableRegistry;
use nvwal::wal::{LogRecord, TableRecovery};
use nvwal::{NvMemory, SimulatedRegion};

pub const REGION_SIZE: u64 = 64 * 1024;
pub const MAX_TABLES: u32 = 4;

/// Offsets inside a table record
pub const RECORD_TAIL: u64 = 16;
pub const RECORD_COMMIT: u64 = 24;

/// Offset of `next` inside a WAL entry
pub const ENTRY_NEXT: u64 = 24;

pub struct Harness {
    pub sim: Arc<SimulatedRegion>,
    pub allocator: FreeSpaceManager,
    pub registry: TableRegistry,
    pub recovered: Vec<TableRecovery>,
}

impl Harness {
    /// Fresh formatted region with an empty registry
    pub fn new() -> Self {
        Self::open(Arc::new(SimulatedRegion::new(REGION_SIZE)))
    }

    /// Bring up allocator and registry on an existing region
    pub fn open(sim: Arc<SimulatedRegion>) -> Self {
        let region: Arc<dyn NvMemory> = sim.clone();
        let allocator = FreeSpaceManager::init(Arc::clone(&region), MAX_TABLES).unwrap();
        let (registry, recovered) = TableRegistry::recover(region, *allocator.superblock()).unwrap();
        Self {
            sim,
            allocator,
            registry,
            recovered,
        }
    }

    /// Simulated restart from the durable image
    pub fn restart(&self) -> Self {
        Self::open(Arc::new(SimulatedRegion::from_image(self.sim.durable_image())))
    }

    /// Recovery on the durable image, without unwrapping
    pub fn try_restart(&self) -> nvwal::Result<(TableRegistry, Vec<TableRecovery>)> {
        let region: Arc<dyn NvMemory> =
            Arc::new(SimulatedRegion::from_image(self.sim.durable_image()));
        let allocator = FreeSpaceManager::init(Arc::clone(&region), MAX_TABLES)?;
        TableRegistry::recover(region, *allocator.superblock())
    }

    /// (key, payload, committed) for every entry of a table
    pub fn rows(&self, table_id: i32) -> Vec<(i64, Vec<u8>, bool)> {
        self.records(table_id)
            .into_iter()
            .map(|r| {
                let payload = r.read_payload(&*self.sim).unwrap();
                (r.key, payload, r.committed)
            })
            .collect()
    }

    pub fn records(&self, table_id: i32) -> Vec<LogRecord> {
        self.registry
            .get(table_id)
            .unwrap()
            .read_all()
            .collect::<nvwal::Result<Vec<_>>>()
            .unwrap()
    }
}
