//! Crash tests for the WAL
//!
//! Every mutation is re-run once per flush point, with power failing right
//! after that many flushes reached the persistence domain. The durable image
//! is then recovered and checked:
//! - recovery always succeeds
//! - an entry is visible only once its content and payload are durable
//! - visible entries and payloads never overlap free space
//! - the log after a crash is a prefix of the log without one

use std::sync::Arc;

use nvwal::alloc::aligned_size;
use nvwal::wal::{Op, ENTRY_SIZE, TABLE_RECORD_SIZE};
use nvwal::SimulatedRegion;

use crate::common::Harness;

/// Run `op` once per crash point and hand every recovered state to `check`
///
/// `check` gets the recovered harness, the number of flushes that reached
/// durability, and the total number of flush points of `op`.
fn crash_sweep(
    prepare: impl Fn(&Harness),
    op: impl Fn(&Harness),
    check: impl Fn(&Harness, u64, u64),
) {
    let base = Harness::new();
    prepare(&base);
    let image = base.sim.durable_image();

    let probe = Harness::open(Arc::new(SimulatedRegion::from_image(image.clone())));
    let start = probe.sim.flush_count();
    op(&probe);
    let total = probe.sim.flush_count() - start;
    assert!(total > 0);

    for n in 0..=total {
        let h = Harness::open(Arc::new(SimulatedRegion::from_image(image.clone())));
        h.sim.crash_after_flushes(n);
        op(&h);

        let recovered = h.restart();
        assert_live_not_free(&recovered);
        check(&recovered, n, total);
    }
}

/// No table record, entry or payload reachable after recovery is free
fn assert_live_not_free(h: &Harness) {
    let free = h.allocator.free_blocks().unwrap();
    let overlaps_free = |offset: u64, size: u64| free.iter().any(|b| b.overlaps(offset, size));

    for id in h.registry.table_ids() {
        let table = h.registry.get(id).unwrap();
        assert!(!overlaps_free(table.record_offset(), TABLE_RECORD_SIZE));

        for record in h.records(id) {
            assert!(!overlaps_free(record.offset, ENTRY_SIZE), "entry {} is free", record.offset);
            if record.op == Op::Insert {
                assert!(
                    !overlaps_free(record.data_offset, aligned_size(record.data_size)),
                    "payload {} is free",
                    record.data_offset
                );
            }
        }
    }
}

fn committed_rows(h: &Harness) {
    let table = h.registry.create(1, &h.allocator).unwrap();
    table.append(&h.allocator, 1, b"first", Op::Insert).unwrap();
    table.append(&h.allocator, 2, b"second", Op::Insert).unwrap();
    table.advance_commit().unwrap();
}

fn old_rows() -> Vec<(i64, Vec<u8>, bool)> {
    vec![(1, b"first".to_vec(), true), (2, b"second".to_vec(), true)]
}

// =============================================================================
// Single Operation Sweeps
// =============================================================================

#[test]
fn test_crash_during_insert_append() {
    crash_sweep(
        committed_rows,
        |h| {
            let table = h.registry.get(1).unwrap();
            table
                .append(&h.allocator, 99, b"a payload spanning more than one cache line of the region", Op::Insert)
                .unwrap();
        },
        |r, n, total| {
            let rows = r.rows(1);
            // Linked one flush before the tail store
            if n + 1 >= total {
                let mut expected = old_rows();
                expected.push((
                    99,
                    b"a payload spanning more than one cache line of the region".to_vec(),
                    false,
                ));
                assert_eq!(rows, expected, "crash after {} of {} flushes", n, total);
                assert_eq!(r.recovered[0].tail_rolled_forward, n + 1 == total);
            } else {
                assert_eq!(rows, old_rows(), "crash after {} of {} flushes", n, total);
                assert!(!r.recovered[0].tail_rolled_forward);
            }
        },
    );
}

#[test]
fn test_crash_during_first_append_of_table() {
    crash_sweep(
        |h| {
            h.registry.create(1, &h.allocator).unwrap();
        },
        |h| {
            let table = h.registry.get(1).unwrap();
            table.append(&h.allocator, 5, b"only", Op::Insert).unwrap();
        },
        |r, n, total| {
            let rows = r.rows(1);
            if n + 1 >= total {
                assert_eq!(rows, vec![(5, b"only".to_vec(), false)]);
            } else {
                assert!(rows.is_empty(), "crash after {} of {} flushes", n, total);
            }
        },
    );
}

#[test]
fn test_crash_during_delete_append() {
    crash_sweep(
        committed_rows,
        |h| {
            let table = h.registry.get(1).unwrap();
            table.append(&h.allocator, 1, &[], Op::Delete).unwrap();
        },
        |r, n, total| {
            let records = r.records(1);
            if n + 1 >= total {
                assert_eq!(records.len(), 3);
                assert_eq!(records[2].op, Op::Delete);
                assert_eq!(records[2].key, 1);
                assert!(!records[2].committed);
            } else {
                assert_eq!(records.len(), 2, "crash after {} of {} flushes", n, total);
            }
        },
    );
}

#[test]
fn test_crash_during_advance_commit() {
    crash_sweep(
        |h| {
            committed_rows(h);
            let table = h.registry.get(1).unwrap();
            table.append(&h.allocator, 3, b"third", Op::Insert).unwrap();
        },
        |h| {
            h.registry.get(1).unwrap().advance_commit().unwrap();
        },
        |r, n, total| {
            assert_eq!(total, 1);
            let committed: Vec<bool> = r.rows(1).into_iter().map(|(_, _, c)| c).collect();
            if n == 0 {
                assert_eq!(committed, vec![true, true, false]);
            } else {
                assert_eq!(committed, vec![true, true, true]);
            }
        },
    );
}

#[test]
fn test_crash_during_create_table() {
    crash_sweep(
        |_| {},
        |h| {
            h.registry.create(42, &h.allocator).unwrap();
        },
        |r, n, total| {
            // The directory store publishes the table
            if n == total {
                assert_eq!(r.registry.table_ids(), vec![42]);
            } else {
                assert!(r.registry.is_empty(), "crash after {} of {} flushes", n, total);
            }
        },
    );
}

// =============================================================================
// Sequence Sweep
// =============================================================================

#[test]
fn test_crash_anywhere_in_sequence_leaves_a_prefix() {
    let workload = |h: &Harness| {
        let table = h.registry.get(1).unwrap();
        table.append(&h.allocator, 10, b"ten", Op::Insert).unwrap();
        table.append(&h.allocator, 11, b"eleven", Op::Insert).unwrap();
        table.advance_commit().unwrap();
        table.append(&h.allocator, 10, &[], Op::Delete).unwrap();
        table.append(&h.allocator, 12, b"twelve", Op::Insert).unwrap();
    };
    let full = [10i64, 11, 10, 12];

    crash_sweep(
        |h| {
            h.registry.create(1, &h.allocator).unwrap();
        },
        workload,
        |r, n, _total| {
            let records = r.records(1);
            let keys: Vec<i64> = records.iter().map(|rec| rec.key).collect();
            assert!(full.starts_with(&keys), "crash after {} flushes left {:?}", n, keys);

            // Only the first two entries were ever committed
            for (i, rec) in records.iter().enumerate() {
                if rec.committed {
                    assert!(i < 2);
                }
            }
        },
    );
}
