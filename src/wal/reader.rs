//! WAL Reader
//!
//! Lazy, restartable traversal of a table's log from head to tail.

use std::sync::Arc;

use crate::error::{NvError, Result};
use crate::region::NvMemory;

use super::entry::{Op, ENTRY_SIZE};
use super::table::{TablePointers, WalTable};

/// One log entry as seen by a reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Region offset of the entry
    pub offset: u64,
    pub key: i64,
    pub op: Op,
    pub data_offset: u64,
    pub data_size: u64,
    pub payload_crc: u32,
    /// At or before the commit pointer when the cursor was created
    pub committed: bool,
}

impl LogRecord {
    /// Read and verify the payload (empty for deletes)
    pub fn read_payload(&self, region: &dyn NvMemory) -> Result<Vec<u8>> {
        if self.op == Op::Delete || self.data_size == 0 {
            return Ok(Vec::new());
        }

        let len = usize::try_from(self.data_size).map_err(|_| {
            NvError::corrupt(format!("payload of entry {} is too large", self.offset))
        })?;
        let mut payload = vec![0u8; len];
        region.read(self.data_offset, &mut payload)?;

        if crc32fast::hash(&payload) != self.payload_crc {
            return Err(NvError::corrupt(format!(
                "payload of entry {} at offset {} fails its checksum",
                self.offset, self.data_offset
            )));
        }
        Ok(payload)
    }
}

/// Iterator over a table's entries in append order
///
/// Covers the entries up to the tail observed at creation; entries appended
/// later are not visited. `rewind` (or `clone`) restarts the walk.
#[derive(Clone)]
pub struct LogCursor {
    table: Arc<WalTable>,
    snapshot: TablePointers,
    position: Option<u64>,
    /// Still inside the committed prefix
    committed: bool,
    /// Step guard against a cyclic chain
    remaining: u64,
    /// Chain ended early at this entry; reported on the next call
    broken_at: Option<u64>,
}

impl LogCursor {
    pub(crate) fn new(table: Arc<WalTable>, snapshot: TablePointers) -> Self {
        let remaining = table.region().len() / ENTRY_SIZE;
        Self {
            table,
            snapshot,
            position: snapshot.tail.and(snapshot.head),
            committed: snapshot.commit.is_some(),
            remaining,
            broken_at: None,
        }
    }

    /// Restart from the head of the same snapshot
    pub fn rewind(&mut self) {
        *self = Self::new(Arc::clone(&self.table), self.snapshot);
    }

    /// Head/tail/commit this cursor walks
    pub fn snapshot(&self) -> TablePointers {
        self.snapshot
    }

    pub fn table_id(&self) -> i32 {
        self.table.table_id()
    }
}

impl Iterator for LogCursor {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(offset) = self.broken_at.take() {
            return Some(Err(NvError::corrupt(format!(
                "table {}: chain ends at entry {} before reaching the tail",
                self.table.table_id(),
                offset
            ))));
        }

        let offset = self.position?;

        if self.remaining == 0 {
            self.position = None;
            return Some(Err(NvError::corrupt(format!(
                "table {}: entry chain does not terminate",
                self.table.table_id()
            ))));
        }
        self.remaining -= 1;

        let entry = match self.table.read_entry(offset) {
            Ok(entry) => entry,
            Err(e) => {
                self.position = None;
                return Some(Err(e));
            }
        };

        let committed = self.committed;
        if Some(offset) == self.snapshot.commit {
            self.committed = false;
        }

        self.position = if Some(offset) == self.snapshot.tail {
            None
        } else {
            if entry.next.is_none() {
                self.broken_at = Some(offset);
            }
            entry.next
        };

        Some(Ok(LogRecord {
            offset,
            key: entry.key,
            op: entry.op,
            data_offset: entry.data_offset,
            data_size: entry.data_size,
            payload_crc: entry.payload_crc,
            committed,
        }))
    }
}
