//! Tests for Engine
//!
//! These tests verify:
//! - Row operations on a mapped region file
//! - Persistence across close/reopen
//! - Registry errors surfaced through the engine
//! - Engine lifecycle (shutdown, NotInitialized)
//! - Region binding errors (size mismatch, second owner)

use std::path::Path;

use nvwal::config::{Config, PersistMode};
use nvwal::engine::{Engine, ScannedRow};
use nvwal::{NvError, Op};
use tempfile::TempDir;

const REGION_SIZE: u64 = 1024 * 1024;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(path: &Path) -> Config {
    Config::builder()
        .region_path(path)
        .region_size(REGION_SIZE)
        .max_tables(8)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir.path().join("region.img"))).unwrap();
    (temp_dir, engine)
}

fn reopen(temp_dir: &TempDir) -> Engine {
    Engine::open(config_for(&temp_dir.path().join("region.img"))).unwrap()
}

fn collect(engine: &Engine, table_id: i32) -> Vec<ScannedRow> {
    engine
        .scan(table_id)
        .unwrap()
        .collect::<nvwal::Result<Vec<_>>>()
        .unwrap()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_open_creates_and_formats_region() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("region.img");

    let engine = Engine::open(config_for(&path)).unwrap();

    assert!(engine.is_open());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), REGION_SIZE);
    let report = engine.recovery_report().unwrap();
    assert!(report.formatted);
    assert!(report.tables.is_empty());
    assert_eq!(engine.free_bytes().unwrap(), engine.capacity().unwrap());
}

#[test]
fn test_put_and_scan() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();

    let offset = engine.put_row(1, 42, b"hello").unwrap();

    assert!(offset > 0);
    let rows = collect(&engine, 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, 42);
    assert_eq!(rows[0].op, Op::Insert);
    assert_eq!(&rows[0].payload[..], b"hello");
    assert!(!rows[0].committed);
}

#[test]
fn test_delete_appends_history() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    engine.put_row(1, 42, b"hello").unwrap();

    engine.delete_row(1, 42).unwrap();

    let rows = collect(&engine, 1);
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].key, rows[0].op), (42, Op::Insert));
    assert_eq!((rows[1].key, rows[1].op), (42, Op::Delete));
    assert!(rows[1].payload.is_empty());
}

#[test]
fn test_scan_rewind() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    engine.put_row(1, 1, b"a").unwrap();
    engine.put_row(1, 2, b"b").unwrap();

    let mut scan = engine.scan(1).unwrap();
    assert_eq!(scan.next().unwrap().unwrap().key, 1);
    scan.rewind();

    assert_eq!(scan.map(|r| r.unwrap().key).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn test_read_all_exposes_offsets() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    let offset = engine.put_row(1, 1, b"payload").unwrap();

    let records: Vec<_> = engine.read_all(1).unwrap().map(|r| r.unwrap()).collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data_offset, offset);
    assert_eq!(records[0].data_size, 7);
    assert_eq!(
        engine.table_pointers(1).unwrap().tail,
        Some(records[0].offset)
    );
}

#[test]
fn test_commit_marks_scanned_rows() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    engine.put_row(1, 1, b"a").unwrap();
    engine.put_row(1, 2, b"b").unwrap();
    engine.advance_commit(1).unwrap();
    engine.put_row(1, 3, b"c").unwrap();

    let committed: Vec<bool> = collect(&engine, 1).iter().map(|r| r.committed).collect();

    assert_eq!(committed, vec![true, true, false]);
}

#[test]
fn test_tables_are_independent() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    engine.create_table(2).unwrap();

    engine.put_row(1, 10, b"one").unwrap();
    engine.put_row(2, 20, b"two").unwrap();
    engine.advance_commit(2).unwrap();

    let one = collect(&engine, 1);
    let two = collect(&engine, 2);
    assert_eq!((one.len(), one[0].key, one[0].committed), (1, 10, false));
    assert_eq!((two.len(), two[0].key, two[0].committed), (1, 20, true));
    assert_eq!(engine.table_ids().unwrap(), vec![1, 2]);
}

// =============================================================================
// Registry Error Tests
// =============================================================================

#[test]
fn test_unknown_table() {
    let (_temp, engine) = setup_temp_engine();

    assert!(matches!(engine.put_row(7, 1, b"x"), Err(NvError::UnknownTable(7))));
    assert!(matches!(engine.delete_row(7, 1), Err(NvError::UnknownTable(7))));
    assert!(matches!(engine.advance_commit(7), Err(NvError::UnknownTable(7))));
    assert!(matches!(engine.scan(7), Err(NvError::UnknownTable(7))));
}

#[test]
fn test_duplicate_table() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    let free = engine.free_bytes().unwrap();

    assert!(matches!(engine.create_table(1), Err(NvError::DuplicateTable(1))));
    assert_eq!(engine.free_bytes().unwrap(), free);
}

#[test]
fn test_registry_full() {
    let (_temp, engine) = setup_temp_engine();
    for id in 0..8 {
        engine.create_table(id).unwrap();
    }
    let free = engine.free_bytes().unwrap();

    assert!(matches!(
        engine.create_table(100),
        Err(NvError::RegistryFull { capacity: 8 })
    ));
    assert_eq!(engine.free_bytes().unwrap(), free);
    // A duplicate is reported as such even when full
    assert!(matches!(engine.create_table(3), Err(NvError::DuplicateTable(3))));
}

#[test]
fn test_empty_insert_rejected() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();

    assert!(matches!(engine.put_row(1, 1, b""), Err(NvError::InvalidArgument(_))));
    assert!(collect(&engine, 1).is_empty());
}

#[test]
fn test_out_of_space_surfaces() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    let chunk = vec![7u8; 64 * 1024];

    let mut stored = 0;
    let err = loop {
        match engine.put_row(1, stored, &chunk) {
            Ok(_) => stored += 1,
            Err(e) => break e,
        }
    };

    assert!(matches!(err, NvError::OutOfSpace { .. }));
    assert!(stored > 0);
    assert_eq!(collect(&engine, 1).len(), stored as usize);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_rows_survive_reopen() {
    let (temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    engine.put_row(1, 1, b"durable").unwrap();
    engine.advance_commit(1).unwrap();
    engine.put_row(1, 2, b"provisional").unwrap();
    let free = engine.free_bytes().unwrap();
    engine.shutdown().unwrap();
    drop(engine);

    let engine = reopen(&temp);

    let report = engine.recovery_report().unwrap();
    assert!(!report.formatted);
    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.tables[0].entries, 2);
    assert_eq!(report.tables[0].committed, 1);
    assert_eq!(engine.free_bytes().unwrap(), free);

    let rows = collect(&engine, 1);
    assert_eq!(&rows[0].payload[..], b"durable");
    assert!(rows[0].committed);
    assert_eq!(&rows[1].payload[..], b"provisional");
    assert!(!rows[1].committed);
}

#[test]
fn test_reopen_without_shutdown() {
    let (temp, engine) = setup_temp_engine();
    engine.create_table(3).unwrap();
    engine.put_row(3, 9, b"nine").unwrap();
    // Dropped without shutdown: every mutation was already durable
    drop(engine);

    let engine = reopen(&temp);

    assert_eq!(engine.table_ids().unwrap(), vec![3]);
    assert_eq!(collect(&engine, 3)[0].key, 9);
}

#[test]
fn test_persisted_table_capacity_wins() {
    let (temp, engine) = setup_temp_engine();
    engine.shutdown().unwrap();
    drop(engine);

    let config = Config::builder()
        .region_path(temp.path().join("region.img"))
        .region_size(REGION_SIZE)
        .max_tables(32)
        .build();
    let engine = Engine::open(config).unwrap();

    assert_eq!(engine.max_tables().unwrap(), 8);
}

#[test]
fn test_cache_line_mode() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .region_path(temp_dir.path().join("region.img"))
        .region_size(REGION_SIZE)
        .persist_mode(PersistMode::CacheLine)
        .build();
    let engine = Engine::open(config.clone()).unwrap();
    engine.create_table(1).unwrap();
    engine.put_row(1, 1, b"dax").unwrap();
    engine.shutdown().unwrap();
    drop(engine);

    let engine = Engine::open(config).unwrap();
    assert_eq!(&collect(&engine, 1)[0].payload[..], b"dax");
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_operations_after_shutdown() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();

    engine.shutdown().unwrap();

    assert!(!engine.is_open());
    assert!(matches!(engine.create_table(2), Err(NvError::NotInitialized)));
    assert!(matches!(engine.put_row(1, 1, b"x"), Err(NvError::NotInitialized)));
    assert!(matches!(engine.delete_row(1, 1), Err(NvError::NotInitialized)));
    assert!(matches!(engine.advance_commit(1), Err(NvError::NotInitialized)));
    assert!(matches!(engine.scan(1), Err(NvError::NotInitialized)));
    assert!(matches!(engine.table_ids(), Err(NvError::NotInitialized)));
    assert!(matches!(engine.free_bytes(), Err(NvError::NotInitialized)));
    assert!(matches!(engine.shutdown(), Err(NvError::NotInitialized)));
}

#[test]
fn test_scan_outlives_shutdown() {
    let (_temp, engine) = setup_temp_engine();
    engine.create_table(1).unwrap();
    engine.put_row(1, 1, b"kept").unwrap();
    let scan = engine.scan(1).unwrap();

    engine.shutdown().unwrap();

    let rows: Vec<_> = scan.map(|r| r.unwrap()).collect();
    assert_eq!(&rows[0].payload[..], b"kept");
}

// =============================================================================
// Region Binding Tests
// =============================================================================

#[test]
fn test_size_mismatch_is_config_error() {
    let (temp, engine) = setup_temp_engine();
    engine.shutdown().unwrap();
    drop(engine);

    let config = Config::builder()
        .region_path(temp.path().join("region.img"))
        .region_size(2 * REGION_SIZE)
        .build();

    assert!(matches!(Engine::open(config), Err(NvError::Config(_))));
}

#[test]
fn test_region_has_single_owner() {
    let (temp, _engine) = setup_temp_engine();

    let second = Engine::open(config_for(&temp.path().join("region.img")));

    assert!(matches!(second, Err(NvError::Region(_))));
}

#[test]
fn test_region_size_in_mib() {
    assert_eq!(Config::mib_to_bytes(64).unwrap(), 64 * 1024 * 1024);
    assert!(matches!(
        Config::mib_to_bytes(u64::MAX / 1024),
        Err(NvError::Config(_))
    ));
}
