//! Tests for the WalEntry codec
//!
//! These tests verify:
//! - The `next` link is outside the entry checksum
//! - Torn or never-written entries are rejected

use nvwal::wal::{Op, WalEntry, ENTRY_SIZE};
use nvwal::NvError;

#[test]
fn test_next_is_outside_checksum() {
    let entry = WalEntry::insert(42, 4096, b"hello");
    let mut buf = entry.encode();
    buf[24..32].copy_from_slice(&8192u64.to_le_bytes());

    let decoded = WalEntry::decode(&buf, 0).unwrap();
    assert_eq!(decoded.key, 42);
    assert_eq!(decoded.op, Op::Insert);
    assert_eq!((decoded.data_offset, decoded.data_size), (4096, 5));
    assert_eq!(decoded.next, Some(8192));
}

#[test]
fn test_torn_content_detected() {
    let mut buf = WalEntry::delete(-7).encode();
    buf[0] ^= 0x01;

    assert!(matches!(
        WalEntry::decode(&buf, 512),
        Err(NvError::CorruptPersistentState(_))
    ));
}

#[test]
fn test_zeroed_entry_is_rejected() {
    // A never-written entry must not decode as valid
    let buf = [0u8; ENTRY_SIZE as usize];
    assert!(WalEntry::decode(&buf, 512).is_err());
}
