//! WAL Recovery
//!
//! Rebuilds a table's volatile state from its persisted record after a
//! restart. No replay happens here: callers decide what to reapply using
//! `read_all` and the committed annotation.

use std::sync::Arc;

use crate::alloc::GRANULE;
use crate::error::{NvError, Result};
use crate::region::{NvMemory, Superblock};

use super::entry::{Op, WalEntry, ENTRY_SIZE};
use super::table::{TablePointers, WalTable, TAIL_FIELD};

/// Result of recovering one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecovery {
    pub table_id: i32,

    /// Entries reachable from head
    pub entries: u64,

    /// Entries at or before the commit pointer
    pub committed: u64,

    /// The last append crashed between linking and the tail store; the
    /// tail was moved onto the linked entry
    pub tail_rolled_forward: bool,
}

/// Recover the table whose record lives at `record`
///
/// Walks the chain from head, validating every reachable entry. The chain
/// must end at the recorded tail, or exactly one entry past it (that entry's
/// content was durable before it was linked, so the tail is rolled forward).
/// Anything else is corruption.
pub fn recover_table(
    region: &Arc<dyn NvMemory>,
    superblock: &Superblock,
    record: u64,
) -> Result<(WalTable, TableRecovery)> {
    let (table_id, recorded) = WalTable::read_record(&**region, record)?;

    let max_entries = superblock.heap_size() / ENTRY_SIZE;
    let mut entries: u64 = 0;
    let mut tail_position = None;
    let mut commit_position = None;
    let mut last = None;
    let mut cursor = recorded.head;

    while let Some(offset) = cursor {
        entries += 1;
        if entries > max_entries {
            return Err(NvError::corrupt(format!(
                "table {}: entry chain does not terminate",
                table_id
            )));
        }

        check_entry_location(superblock, table_id, offset)?;
        let entry = WalEntry::read(&**region, offset)?;
        check_payload_location(superblock, table_id, offset, &entry)?;

        if Some(offset) == recorded.tail {
            tail_position = Some(entries);
        }
        if Some(offset) == recorded.commit {
            commit_position = Some(entries);
        }

        last = Some(offset);
        cursor = entry.next;
    }

    let (tail, rolled) = match (recorded.tail, tail_position) {
        (None, _) if entries == 0 => (None, false),
        (None, _) if entries == 1 => (last, true),
        (Some(_), Some(at)) if at == entries => (recorded.tail, false),
        (Some(_), Some(at)) if at + 1 == entries => (last, true),
        _ => {
            return Err(NvError::corrupt(format!(
                "table {}: chain of {} entries does not end at the recorded tail {:?}",
                table_id, entries, recorded.tail
            )))
        }
    };

    if recorded.commit.is_some() {
        match commit_position {
            None => {
                return Err(NvError::corrupt(format!(
                    "table {}: commit pointer {:?} is not on the entry chain",
                    table_id, recorded.commit
                )))
            }
            Some(at) if rolled && at == entries => {
                return Err(NvError::corrupt(format!(
                    "table {}: commit pointer is past the recorded tail",
                    table_id
                )))
            }
            Some(_) => {}
        }
    }

    if rolled {
        if let Some(tail) = tail {
            region.atomic_store(record + TAIL_FIELD, tail)?;
        }
        tracing::warn!(table_id, ?tail, "completed interrupted append: tail rolled forward");
    }

    let pointers = TablePointers {
        head: recorded.head,
        tail,
        commit: recorded.commit,
    };
    let report = TableRecovery {
        table_id,
        entries,
        committed: commit_position.unwrap_or(0),
        tail_rolled_forward: rolled,
    };

    tracing::debug!(
        table_id,
        entries = report.entries,
        committed = report.committed,
        "recovered table"
    );

    Ok((
        WalTable::from_parts(table_id, record, Arc::clone(region), pointers),
        report,
    ))
}

fn check_entry_location(superblock: &Superblock, table_id: i32, offset: u64) -> Result<()> {
    let valid = offset >= superblock.heap_start
        && offset % GRANULE == 0
        && offset
            .checked_add(ENTRY_SIZE)
            .is_some_and(|end| end <= superblock.total_size);
    if !valid {
        return Err(NvError::corrupt(format!(
            "table {}: entry link {} points outside the heap",
            table_id, offset
        )));
    }
    Ok(())
}

fn check_payload_location(
    superblock: &Superblock,
    table_id: i32,
    offset: u64,
    entry: &WalEntry,
) -> Result<()> {
    let valid = match entry.op {
        Op::Delete => entry.data_size == 0,
        Op::Insert => {
            entry.data_size > 0
                && entry.data_offset >= superblock.heap_start
                && entry
                    .data_offset
                    .checked_add(entry.data_size)
                    .is_some_and(|end| end <= superblock.total_size)
        }
    };
    if !valid {
        return Err(NvError::corrupt(format!(
            "table {}: entry {} references an invalid payload range",
            table_id, offset
        )));
    }
    Ok(())
}
