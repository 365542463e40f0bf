use std::fs;
use std::path::Path;

use shale::{Action, Database, DatabaseConfig, Document, WritableDatabase};
use tempfile::TempDir;

fn test_config() -> DatabaseConfig {
    DatabaseConfig {
        block_size: 2048,
        flush_threshold: Some(10_000),
        max_changesets: Some(0),
        dangerous_changesets: false,
    }
}

fn doc(data: &str, term: &[u8]) -> Document {
    let mut doc = Document::new();
    doc.set_data(data.as_bytes().to_vec());
    doc.add_term(term, 1);
    doc
}

fn snapshot_record_bases(db_dir: &Path, backup_dir: &Path) {
    for name in ["record.baseA", "record.baseB"] {
        let source = db_dir.join(name);
        if source.exists() {
            fs::copy(&source, backup_dir.join(name)).unwrap();
        } else {
            let _ = fs::remove_file(backup_dir.join(name));
        }
    }
}

fn restore_record_bases(backup_dir: &Path, db_dir: &Path) {
    for name in ["record.baseA", "record.baseB"] {
        let backup = backup_dir.join(name);
        if backup.exists() {
            fs::copy(&backup, db_dir.join(name)).unwrap();
        } else {
            let _ = fs::remove_file(db_dir.join(name));
        }
    }
}

#[test]
fn test_recovery_after_crash_between_postlist_and_record_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let backup = TempDir::new().unwrap();

    let mut db = WritableDatabase::with_config(&path, Action::Create, test_config()).unwrap();
    db.add_document(&doc("first", b"first")).unwrap();
    db.commit().unwrap();
    let survived_revision = db.revision();

    // Roll the record table's base files back after the next commit to
    // simulate a crash landing after the postlist commit but before the
    // record commit published the revision.
    snapshot_record_bases(&path, backup.path());
    db.add_document(&doc("second", b"second")).unwrap();
    db.commit().unwrap();
    let lost_revision = db.revision();
    drop(db);

    restore_record_bases(backup.path(), &path);

    // Reopening for writing detects the torn commit and produces a
    // fresh consistent revision past the half-written one.
    let db = WritableDatabase::with_config(&path, Action::Open, test_config()).unwrap();
    assert!(db.revision() > lost_revision);
    assert_eq!(db.doc_count().unwrap(), 1);
    assert!(db.doc_length(2).is_err());
    assert_eq!(db.doc_length(1).unwrap(), 1);
    assert!(db.revision() > survived_revision);
    drop(db);

    // And a plain reader agrees.
    let reader = Database::open(&path).unwrap();
    assert_eq!(reader.doc_count().unwrap(), 1);
    assert_eq!(reader.term_freq(b"first").unwrap(), 1);
    assert_eq!(reader.term_freq(b"second").unwrap(), 0);
}

#[test]
fn test_reader_survives_torn_record_base() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let backup = TempDir::new().unwrap();

    let mut db = WritableDatabase::with_config(&path, Action::Create, test_config()).unwrap();
    db.add_document(&doc("one", b"one")).unwrap();
    db.commit().unwrap();
    let old_revision = db.revision();

    snapshot_record_bases(&path, backup.path());
    db.add_document(&doc("two", b"two")).unwrap();
    db.commit().unwrap();
    drop(db);
    restore_record_bases(backup.path(), &path);

    // A read-only open lands on the record table's revision; the other
    // tables still hold it, so the snapshot is consistent.
    let reader = Database::open(&path).unwrap();
    assert_eq!(reader.revision(), old_revision);
    assert_eq!(reader.doc_count().unwrap(), 1);
}

#[test]
fn test_corrupt_base_file_falls_back_to_sibling() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    let mut db = WritableDatabase::with_config(&path, Action::Create, test_config()).unwrap();
    db.add_document(&doc("a", b"a")).unwrap();
    db.commit().unwrap();
    db.add_document(&doc("b", b"b")).unwrap();
    db.commit().unwrap();
    let latest = db.revision();
    drop(db);

    // Tear the newer record base; the reader falls back to the older
    // revision, which the other tables still carry.
    let mut torn = false;
    for name in ["record.baseA", "record.baseB"] {
        let base_path = path.join(name);
        if base_path.exists() && !torn {
            let mut bytes = fs::read(&base_path).unwrap();
            if !bytes.is_empty() {
                let last = bytes.len() - 1;
                bytes[last] ^= 0xff;
                fs::write(&base_path, bytes).unwrap();
                torn = true;
            }
        }
    }
    assert!(torn);

    let reader = Database::open(&path).unwrap();
    assert!(reader.revision() <= latest);
    assert!(reader.doc_count().unwrap() >= 1);
}

#[test]
fn test_version_file_validated_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    drop(WritableDatabase::with_config(&path, Action::Create, test_config()).unwrap());

    fs::write(path.join("iamshale"), b"garbage").unwrap();
    match Database::open(&path) {
        Err(shale::ShaleError::DatabaseCorrupt(_)) => {}
        other => panic!("expected DatabaseCorrupt, got {other:?}"),
    }
}
