//! Simulated region for crash testing
//!
//! Keeps two images of the region: the working image every read and write
//! sees, and the durable image holding only what flushes have pushed to the
//! persistence domain. A crash is modelled by reopening from the durable
//! image. Flushes copy whole cache lines, as hardware does.

use parking_lot::Mutex;

use crate::error::Result;

use super::persist::{line_ceil, line_floor};
use super::{check_bounds, check_word_aligned, NvMemory};

/// In-memory region with an explicit persistence domain
pub struct SimulatedRegion {
    state: Mutex<SimState>,
}

struct SimState {
    /// What the running process observes
    working: Vec<u8>,
    /// What survives a crash
    durable: Vec<u8>,
    /// Flush points reached so far (flushes and atomic stores)
    flushes: u64,
    /// Flush points still allowed to reach `durable`; None = unlimited
    budget: Option<u64>,
}

impl SimulatedRegion {
    /// Create a zeroed region of `len` bytes
    pub fn new(len: u64) -> Self {
        Self::from_image(vec![0u8; len as usize])
    }

    /// Reopen a region from a durable image (simulated restart)
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(SimState {
                working: image.clone(),
                durable: image,
                flushes: 0,
                budget: None,
            }),
        }
    }

    /// Let only the next `n` flush points reach durability; later flushes
    /// are lost as if power failed right after the n-th one.
    pub fn crash_after_flushes(&self, n: u64) {
        self.state.lock().budget = Some(n);
    }

    /// Snapshot of what a restart would see
    pub fn durable_image(&self) -> Vec<u8> {
        self.state.lock().durable.clone()
    }

    /// Number of flush points issued since creation
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }
}

impl SimState {
    fn persist(&mut self, offset: u64, len: u64) {
        self.flushes += 1;
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                return;
            }
            *budget -= 1;
        }

        let start = line_floor(offset) as usize;
        let end = (line_ceil(offset + len) as usize).min(self.working.len());
        self.durable[start..end].copy_from_slice(&self.working[start..end]);
    }
}

impl NvMemory for SimulatedRegion {
    fn len(&self) -> u64 {
        self.state.lock().working.len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        check_bounds(offset, buf.len() as u64, state.working.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&state.working[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        check_bounds(offset, bytes.len() as u64, state.working.len() as u64)?;
        let start = offset as usize;
        state.working[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        check_bounds(offset, len, state.working.len() as u64)?;
        state.persist(offset, len);
        Ok(())
    }

    fn atomic_store(&self, offset: u64, value: u64) -> Result<()> {
        check_word_aligned(offset)?;
        let mut state = self.state.lock();
        check_bounds(offset, 8, state.working.len() as u64)?;
        let start = offset as usize;
        state.working[start..start + 8].copy_from_slice(&value.to_le_bytes());
        state.persist(offset, 8);
        Ok(())
    }
}
