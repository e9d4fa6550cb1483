//! Shared helpers for allocator tests

use std::sync::Arc;

use nvwal::alloc::FreeSpaceManager;
use nvwal::{NvMemory, SimulatedRegion};

pub const REGION_SIZE: u64 = 16 * 1024;
pub const MAX_TABLES: u32 = 4;

/// Fresh simulated region plus a formatted allocator on it
pub fn setup() -> (Arc<SimulatedRegion>, FreeSpaceManager) {
    let sim = Arc::new(SimulatedRegion::new(REGION_SIZE));
    let region: Arc<dyn NvMemory> = sim.clone();
    let allocator = FreeSpaceManager::init(region, MAX_TABLES).unwrap();
    (sim, allocator)
}

/// Re-run `init` on the durable image of `sim` (simulated restart)
pub fn restart(sim: &SimulatedRegion) -> (Arc<SimulatedRegion>, FreeSpaceManager) {
    let reopened = Arc::new(SimulatedRegion::from_image(sim.durable_image()));
    let region: Arc<dyn NvMemory> = reopened.clone();
    let allocator = FreeSpaceManager::init(region, MAX_TABLES).unwrap();
    (reopened, allocator)
}
