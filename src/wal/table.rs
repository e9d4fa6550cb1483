//! WAL Table
//!
//! One append-only log per table, anchored by a 32-byte record:
//!
//! ```text
//! ┌───────────┬─────────────┬──────────┬──────────┬────────────┐
//! │ Magic (4) │ TableId (4) │ Head (8) │ Tail (8) │ Commit (8) │
//! └───────────┴─────────────┴──────────┴──────────┴────────────┘
//! ```
//!
//! ## Append Order
//! 1. Payload written and flushed
//! 2. Entry content written and flushed
//! 3. Link: previous tail's `next` (or `head` when empty), atomic store
//! 4. `tail`, atomic store
//!
//! A link is always durable strictly after the content it makes reachable.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::alloc::FreeSpaceManager;
use crate::error::{NvError, Result};
use crate::region::{get_u32, get_u64, NvMemory};

use super::entry::{self, Op, WalEntry, ENTRY_SIZE};
use super::reader::LogCursor;

/// Magic identifying a table record ("WTBL")
const TABLE_MAGIC: u32 = u32::from_le_bytes(*b"WTBL");

/// Bytes allocated per table record
pub const TABLE_RECORD_SIZE: u64 = 32;

const HEAD_FIELD: u64 = 8;
pub(crate) const TAIL_FIELD: u64 = 16;
const COMMIT_FIELD: u64 = 24;

/// Volatile mirror of a table's persisted pointers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TablePointers {
    /// First entry
    pub head: Option<u64>,
    /// Last entry
    pub tail: Option<u64>,
    /// Last committed entry; everything after it is provisional
    pub commit: Option<u64>,
}

impl TablePointers {
    /// Make `entry` the new tail (and head of an empty log)
    fn push(&mut self, entry: u64) {
        if self.head.is_none() {
            self.head = Some(entry);
        }
        self.tail = Some(entry);
    }
}

/// Where an append landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Offset of the new log entry
    pub entry_offset: u64,
    /// Offset of the payload (inserts only)
    pub data_offset: Option<u64>,
}

/// A table's write-ahead log
///
/// ## Concurrency:
/// - `pointers` is the per-table mutex: linking, the tail store and
///   `advance_commit` serialize on it, and cursors read entries under it
/// - Payload and entry content are written before the mutex is taken
pub struct WalTable {
    table_id: i32,

    /// Offset of the persisted table record
    record: u64,

    region: Arc<dyn NvMemory>,

    pointers: Mutex<TablePointers>,
}

impl WalTable {
    /// Allocate, initialize and persist an empty table record
    ///
    /// The record is not reachable until the registry links it.
    pub(crate) fn create(
        region: Arc<dyn NvMemory>,
        allocator: &FreeSpaceManager,
        table_id: i32,
    ) -> Result<Self> {
        let record = allocator.allocate(TABLE_RECORD_SIZE)?;

        let mut buf = [0u8; TABLE_RECORD_SIZE as usize];
        buf[0..4].copy_from_slice(&TABLE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&table_id.to_le_bytes());
        if let Err(e) = region.durably_write(record, &buf) {
            return Err(allocator.release_on_error(&[(record, TABLE_RECORD_SIZE)], e));
        }

        Ok(Self::from_parts(table_id, record, region, TablePointers::default()))
    }

    /// Rebuild a table from recovered state
    pub(crate) fn from_parts(
        table_id: i32,
        record: u64,
        region: Arc<dyn NvMemory>,
        pointers: TablePointers,
    ) -> Self {
        Self {
            table_id,
            record,
            region,
            pointers: Mutex::new(pointers),
        }
    }

    /// Read a persisted table record
    pub(crate) fn read_record(region: &dyn NvMemory, record: u64) -> Result<(i32, TablePointers)> {
        let mut buf = [0u8; TABLE_RECORD_SIZE as usize];
        region.read(record, &mut buf).map_err(|e| {
            NvError::corrupt(format!("table record at {} unreadable: {}", record, e))
        })?;

        if get_u32(&buf, 0) != TABLE_MAGIC {
            return Err(NvError::corrupt(format!(
                "no table record at offset {}",
                record
            )));
        }

        let table_id = get_u32(&buf, 4) as i32;
        let link = |at: u64| {
            let value = get_u64(&buf, at as usize);
            (value != 0).then_some(value)
        };

        Ok((
            table_id,
            TablePointers {
                head: link(HEAD_FIELD),
                tail: link(TAIL_FIELD),
                commit: link(COMMIT_FIELD),
            },
        ))
    }

    /// Append a mutation to the log
    ///
    /// Inserts need a non-empty payload; deletes take none. A failure before
    /// the link leaves nothing behind: the link word is cleared again and the
    /// payload and entry space is released. A failed tail store comes after
    /// a durable link, so the entry stays in the log (and in the mirrored
    /// pointers) even though the error is returned.
    pub fn append(
        &self,
        allocator: &FreeSpaceManager,
        key: i64,
        payload: &[u8],
        op: Op,
    ) -> Result<Appended> {
        let (entry, data) = match op {
            Op::Insert => {
                if payload.is_empty() {
                    return Err(NvError::InvalidArgument(
                        "insert payload must be non-empty".to_string(),
                    ));
                }
                let data = (allocator.allocate(payload.len() as u64)?, payload.len() as u64);
                if let Err(e) = self.region.durably_write(data.0, payload) {
                    return Err(allocator.release_on_error(&[data], e));
                }
                (WalEntry::insert(key, data.0, payload), Some(data))
            }
            Op::Delete => {
                if !payload.is_empty() {
                    return Err(NvError::InvalidArgument(
                        "delete entries carry no payload".to_string(),
                    ));
                }
                (WalEntry::delete(key), None)
            }
        };

        let undo = |entry_offset: Option<u64>, cause: NvError| {
            let taken: Vec<(u64, u64)> = data
                .into_iter()
                .chain(entry_offset.map(|offset| (offset, ENTRY_SIZE)))
                .collect();
            allocator.release_on_error(&taken, cause)
        };

        let entry_offset = allocator.allocate(ENTRY_SIZE).map_err(|e| undo(None, e))?;

        // (1) content
        self.region
            .durably_write(entry_offset, &entry.encode())
            .map_err(|e| undo(Some(entry_offset), e))?;

        let mut pointers = self.pointers.lock();

        // (2) linkage
        let link = match pointers.tail {
            None => self.record + HEAD_FIELD,
            Some(tail) => tail + entry::NEXT_FIELD,
        };
        if let Err(e) = self.region.atomic_store(link, entry_offset) {
            // The word may have reached the region even though the store failed
            let unlinked =
                self.region.atomic_store(link, 0).is_ok() || !self.holds(link, entry_offset);
            if unlinked {
                drop(pointers);
                return Err(undo(Some(entry_offset), e));
            }
            pointers.push(entry_offset);
            return Err(e);
        }
        pointers.push(entry_offset);

        // (3) visibility
        self.region.atomic_store(self.record + TAIL_FIELD, entry_offset)?;

        tracing::trace!(table_id = self.table_id, key, ?op, entry_offset, "appended");

        Ok(Appended {
            entry_offset,
            data_offset: data.map(|(offset, _)| offset),
        })
    }

    /// Mark everything up to the current tail as committed
    ///
    /// Returns the new commit offset (None for an empty log). If the store
    /// fails the mirrored commit is left where it was, so calling again
    /// persists the pointer again.
    pub fn advance_commit(&self) -> Result<Option<u64>> {
        let mut pointers = self.pointers.lock();

        if let Some(tail) = pointers.tail {
            if pointers.commit != Some(tail) {
                self.region.atomic_store(self.record + COMMIT_FIELD, tail)?;
                pointers.commit = Some(tail);
            }
        }

        tracing::debug!(table_id = self.table_id, commit = ?pointers.commit, "advanced commit");
        Ok(pointers.commit)
    }

    /// Lazy walk from head to the current tail
    pub fn read_all(self: &Arc<Self>) -> LogCursor {
        LogCursor::new(Arc::clone(self), self.pointers())
    }

    pub fn table_id(&self) -> i32 {
        self.table_id
    }

    /// Offset of the persisted table record
    pub fn record_offset(&self) -> u64 {
        self.record
    }

    /// Snapshot of head/tail/commit
    pub fn pointers(&self) -> TablePointers {
        *self.pointers.lock()
    }

    /// Read one entry while holding the table mutex
    pub(crate) fn read_entry(&self, offset: u64) -> Result<WalEntry> {
        let _pointers = self.pointers.lock();
        WalEntry::read(&*self.region, offset)
    }

    pub(crate) fn region(&self) -> &Arc<dyn NvMemory> {
        &self.region
    }

    fn holds(&self, offset: u64, value: u64) -> bool {
        self.region.read_u64(offset).is_ok_and(|word| word == value)
    }
}
