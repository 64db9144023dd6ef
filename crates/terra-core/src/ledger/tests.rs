//! Tests for the typed ledger.

use rusqlite::types::Value;

use super::*;
use crate::store::{Database, InsertOptions};

fn setup() -> (Database, FileLedger) {
    let db = Database::in_memory().expect("failed to open database");
    let (ledger, manifest) =
        create_ledger_tables(&db, LEDGER_TABLE, MANIFEST_TABLE).expect("failed to create tables");
    manifest
        .insert_rows(
            &[
                vec![
                    Value::Text("mock_obs_1".into()),
                    Value::Text("[\"100_2023-01-01/100_2023-01-01_rec.bag\"]".into()),
                ],
                vec![
                    Value::Text("mock_obs_2".into()),
                    Value::Text("[\"100_2023-01-01/100_2023-01-01_eye.hdf5\"]".into()),
                ],
            ],
            &[MANIFEST_ID_COLUMN, MANIFEST_PATHS_COLUMN],
            &InsertOptions::new(),
        )
        .expect("failed to seed manifest");
    let ledger = FileLedger::new(ledger).expect("ledger schema");
    (db, ledger)
}

fn pending(fname: &str, dest: &str) -> PendingCopy {
    PendingCopy {
        sensor_file_id: "mock_obs_1".into(),
        src_dirname: "/nas/data/".into(),
        dest_dirname: dest.into(),
        fname: fname.into(),
        rsync_operation: ">f+++++++++".into(),
    }
}

#[test]
fn test_create_tables_is_idempotent() {
    let (db, _ledger) = setup();
    create_ledger_tables(&db, LEDGER_TABLE, MANIFEST_TABLE).expect("second create");

    let ledger = FileLedger::open(&db, LEDGER_TABLE).unwrap();
    assert_eq!(ledger.table().column_names(), LEDGER_COLUMNS);
    assert_eq!(ledger.table().primary_key(), ["operation_id"]);
}

#[test]
fn test_open_rejects_non_ledger_table() {
    let (db, _ledger) = setup();
    let err = FileLedger::open(&db, MANIFEST_TABLE).unwrap_err();
    assert!(matches!(err, StoreError::Schema(_)), "got {err:?}");
}

#[test]
fn test_record_written() {
    let (_db, ledger) = setup();

    let first = ledger
        .record_written("mock_obs_1", "/nas/data/", "100_2023-01-01/100_2023-01-01_rec.bag", "2023-01-01 10:00:00")
        .unwrap();
    let second = ledger
        .record_written("mock_obs_2", "/nas/data/", "100_2023-01-01/100_2023-01-01_eye.hdf5", "2023-01-01 10:00:00")
        .unwrap();
    assert!(second > first);

    let entry = ledger.get(first).unwrap().expect("row exists");
    assert!(entry.is_write_origin());
    assert_eq!(entry.is_finished, None);
    assert!(!entry.is_deleted);
    assert_eq!(entry.rsync_operation, None);
    assert_eq!(entry.bare_name(), "100_2023-01-01_rec.bag");

    assert_eq!(ledger.entries_at("/nas/data/").unwrap().len(), 2);
    assert!(ledger.entries_at("/nas/data").unwrap().is_empty());
}

#[test]
fn test_record_written_requires_manifest_entry() {
    let (_db, ledger) = setup();
    let err = ledger
        .record_written("unknown", "/nas/data/", "a.txt", "2023-01-01 10:00:00")
        .unwrap_err();
    assert!(matches!(err, StoreError::Command { .. }));
}

#[test]
fn test_pending_lifecycle() {
    let (_db, ledger) = setup();

    let written = ledger
        .record_pending(&[pending("a.bag", "/neo/data/"), pending("b.bag", "/neo/data/")])
        .unwrap();
    assert_eq!(written, 2);

    let unfinished = ledger.unfinished().unwrap();
    assert_eq!(unfinished.len(), 2);
    assert!(unfinished.iter().all(|e| e.time_verified.is_none()));
    assert!(unfinished.iter().all(|e| e.is_finished == Some(false)));

    let a = ledger.pending_copy("/neo/data/", "a.bag").unwrap().expect("pending a");
    assert!(ledger.finished_copy("/neo/data/", "a.bag").unwrap().is_none());

    assert!(ledger.mark_finished(a.operation_id, "2023-02-01 00:00:00").unwrap());
    let finished = ledger.finished_copy("/neo/data/", "a.bag").unwrap().expect("finished a");
    assert_eq!(finished.operation_id, a.operation_id);
    assert_eq!(finished.time_verified.as_deref(), Some("2023-02-01 00:00:00"));
    assert!(ledger.pending_copy("/neo/data/", "a.bag").unwrap().is_none());

    assert!(ledger.mark_unfinished(a.operation_id).unwrap());
    assert_eq!(ledger.unfinished().unwrap().len(), 2);

    let b = ledger.pending_copy("/neo/data/", "b.bag").unwrap().unwrap();
    assert!(ledger.remove(b.operation_id).unwrap());
    assert!(ledger.get(b.operation_id).unwrap().is_none());
    assert!(!ledger.remove(b.operation_id).unwrap());
}

#[test]
fn test_removed_operation_id_is_not_reused() {
    let (_db, ledger) = setup();

    ledger.record_pending(&[pending("a.bag", "/neo/data/")]).unwrap();
    let first = ledger.pending_copy("/neo/data/", "a.bag").unwrap().expect("pending a");
    assert!(ledger.remove(first.operation_id).unwrap());

    ledger.record_pending(&[pending("a.bag", "/neo/data/")]).unwrap();
    let second = ledger.pending_copy("/neo/data/", "a.bag").unwrap().expect("pending a again");
    assert_ne!(second.operation_id, first.operation_id);
    assert!(second.operation_id.0 > first.operation_id.0);
}

#[test]
fn test_record_pending_empty_batch() {
    let (_db, ledger) = setup();
    assert_eq!(ledger.record_pending(&[]).unwrap(), 0);
    assert!(ledger.entries().unwrap().is_empty());
}

#[test]
fn test_age_filters() {
    let (_db, ledger) = setup();

    let old = ledger
        .record_written("mock_obs_1", "/nas/data/", "s/a.bag", "2023-01-01 00:00:00")
        .unwrap();
    ledger
        .record_written("mock_obs_1", "/nas/data/", "s/b.bag", "2023-03-01 00:00:00")
        .unwrap();
    let deleted = ledger
        .record_written("mock_obs_1", "/nas/data/", "s/c.bag", "2023-01-01 00:00:00")
        .unwrap();
    ledger.mark_deleted(deleted).unwrap();

    let aged = ledger.write_origin_before("/nas/data/", "2023-02-01 00:00:00").unwrap();
    assert_eq!(aged.iter().map(|e| e.operation_id).collect::<Vec<_>>(), vec![old]);

    ledger
        .record_pending(&[pending("s/a.bag", "/neo/data/"), pending("s/a.bag", "/who/data/")])
        .unwrap();
    for entry in ledger.unfinished().unwrap() {
        ledger.mark_finished(entry.operation_id, "2023-01-15 00:00:00").unwrap();
    }

    let dests = vec!["/neo/data/".to_string()];
    let copies = ledger.durable_copies_before(&dests, "2023-02-01 00:00:00").unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].dest_dirname, "/neo/data/");

    assert!(ledger.durable_copies_before(&dests, "2023-01-01 00:00:00").unwrap().is_empty());
    assert!(ledger.durable_copies_before(&[], "2099-01-01 00:00:00").unwrap().is_empty());
}

#[test]
fn test_bare_name() {
    assert_eq!(bare_name("100_2023-01-01/rec.bag"), "rec.bag");
    assert_eq!(bare_name("rec.bag"), "rec.bag");
}
