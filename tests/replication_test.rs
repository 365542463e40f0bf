use shale::changeset::{changeset_file_name, get_changeset_revisions};
use shale::replication::{read_message, ReplicationInfo, ReplyType};
use shale::util::pack::{pack_uint, unpack_uint};
use shale::{Action, Database, DatabaseConfig, Document, WritableDatabase};
use tempfile::TempDir;

fn changeset_config() -> DatabaseConfig {
    DatabaseConfig {
        block_size: 2048,
        flush_threshold: Some(10_000),
        max_changesets: Some(10),
        dangerous_changesets: false,
    }
}

fn doc(term: &[u8]) -> Document {
    let mut doc = Document::new();
    doc.set_data(term.to_vec());
    doc.add_term(term, 1);
    doc
}

fn token(revision: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    pack_uint(&mut buf, revision);
    buf
}

fn drain_messages(bytes: &[u8]) -> Vec<(ReplyType, Vec<u8>)> {
    let mut cursor = std::io::Cursor::new(bytes);
    let mut messages = Vec::new();
    loop {
        let (tag, payload) = read_message(&mut cursor).unwrap();
        let reply = ReplyType::from_u8(tag).unwrap();
        let done = matches!(reply, ReplyType::EndOfChanges | ReplyType::Fail);
        messages.push((reply, payload));
        if done {
            break;
        }
    }
    assert_eq!(cursor.position() as usize, bytes.len());
    messages
}

#[test]
fn test_changeset_file_emitted_with_revision_range() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();

    // The very first commit has no predecessor, so no changeset.
    db.add_document(&doc(b"one")).unwrap();
    db.commit().unwrap();
    let first = db.revision();
    assert!(!path.join(changeset_file_name(0)).exists());

    db.add_document(&doc(b"two")).unwrap();
    db.commit().unwrap();
    let second = db.revision();

    let changes = path.join(changeset_file_name(first));
    assert!(changes.exists());
    assert_eq!(get_changeset_revisions(&changes).unwrap(), (first, second));

    // The changeset body carries the packed end revision as its tail.
    let bytes = std::fs::read(&changes).unwrap();
    let tail_start = bytes.len() - 2;
    assert_eq!(bytes[tail_start], 0);
    let mut tail = &bytes[tail_start + 1..];
    assert_eq!(unpack_uint(&mut tail).unwrap(), second);
}

#[test]
fn test_changesets_disabled_by_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = DatabaseConfig {
        max_changesets: Some(0),
        ..changeset_config()
    };
    let mut db = WritableDatabase::with_config(&path, Action::Create, config).unwrap();

    db.add_document(&doc(b"one")).unwrap();
    db.commit().unwrap();
    let first = db.revision();
    db.add_document(&doc(b"two")).unwrap();
    db.commit().unwrap();

    assert!(!path.join(changeset_file_name(first)).exists());
}

#[test]
fn test_dangerous_flag_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = DatabaseConfig {
        dangerous_changesets: true,
        ..changeset_config()
    };
    let mut db = WritableDatabase::with_config(&path, Action::Create, config).unwrap();
    db.add_document(&doc(b"one")).unwrap();
    db.commit().unwrap();
    let first = db.revision();
    db.add_document(&doc(b"two")).unwrap();
    db.commit().unwrap();

    // Header still parses; the flag lives just past the revisions.
    let changes = path.join(changeset_file_name(first));
    assert!(get_changeset_revisions(&changes).is_ok());
}

#[test]
fn test_fresh_follower_gets_whole_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    let current = db.revision();
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    // The follower knows revision 0, for which no changeset exists.
    leader
        .write_changesets_to(&mut out, &token(0), false, &mut info)
        .unwrap();

    let messages = drain_messages(&out);
    assert_eq!(info.fullcopy_count, 1);
    assert_eq!(info.changeset_count, 0);
    assert!(info.changed);

    assert_eq!(messages[0].0, ReplyType::DbHeader);
    let mut header = messages[0].1.as_slice();
    let uuid_len = unpack_uint(&mut header).unwrap() as usize;
    assert_eq!(uuid_len, 16);
    let uuid_bytes = &header[..uuid_len];
    assert_eq!(uuid_bytes, leader.uuid().as_bytes());
    let mut rest = &header[uuid_len..];
    assert_eq!(unpack_uint(&mut rest).unwrap(), current);

    // Filename/filedata pairs, ending with the version file, then the
    // footer and end-of-changes.
    let mut filenames = Vec::new();
    let mut i = 1;
    while messages[i].0 == ReplyType::DbFilename {
        filenames.push(messages[i].1.clone());
        assert_eq!(messages[i + 1].0, ReplyType::DbFiledata);
        i += 2;
    }
    assert!(filenames.contains(&b"postlist.DB".to_vec()));
    assert!(filenames.contains(&b"record.baseB".to_vec()));
    assert_eq!(filenames.last().unwrap(), &b"iamshale".to_vec());

    assert_eq!(messages[i].0, ReplyType::DbFooter);
    let mut footer = messages[i].1.as_slice();
    assert_eq!(unpack_uint(&mut footer).unwrap(), current);
    assert_eq!(messages[i + 1].0, ReplyType::EndOfChanges);
    assert_eq!(messages.len(), i + 2);
}

#[test]
fn test_unparsable_token_forces_whole_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    leader
        .write_changesets_to(&mut out, b"", false, &mut info)
        .unwrap();

    assert_eq!(info.fullcopy_count, 1);
    assert_eq!(drain_messages(&out)[0].0, ReplyType::DbHeader);
}

#[test]
fn test_behind_follower_gets_exactly_one_changeset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    let previous = db.revision();
    db.add_document(&doc(b"beta")).unwrap();
    db.commit().unwrap();
    let current = db.revision();
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    leader
        .write_changesets_to(&mut out, &token(previous), false, &mut info)
        .unwrap();

    let messages = drain_messages(&out);
    assert_eq!(info.changeset_count, 1);
    assert_eq!(info.fullcopy_count, 0);
    assert!(info.changed);

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, ReplyType::Changeset);
    assert_eq!(messages[1].0, ReplyType::EndOfChanges);

    // The changeset payload is the file as emitted at commit time.
    let on_disk = std::fs::read(path.join(changeset_file_name(previous))).unwrap();
    assert_eq!(messages[0].1, on_disk);
    assert_eq!(
        get_changeset_revisions(path.join(changeset_file_name(previous))).unwrap(),
        (previous, current)
    );
}

#[test]
fn test_follower_several_revisions_behind_gets_a_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    let start = db.revision();
    for term in [b"beta".as_slice(), b"gamma", b"delta"] {
        db.add_document(&doc(term)).unwrap();
        db.commit().unwrap();
    }
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    leader
        .write_changesets_to(&mut out, &token(start), false, &mut info)
        .unwrap();

    assert_eq!(info.changeset_count, 3);
    assert_eq!(info.fullcopy_count, 0);
    let messages = drain_messages(&out);
    assert_eq!(messages.len(), 4);
    assert!(messages[..3].iter().all(|(r, _)| *r == ReplyType::Changeset));
}

#[test]
fn test_caught_up_follower_gets_end_of_changes_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    let current = db.revision();
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    leader
        .write_changesets_to(&mut out, &token(current), false, &mut info)
        .unwrap();

    let messages = drain_messages(&out);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, ReplyType::EndOfChanges);
    assert_eq!(info.fullcopy_count, 0);
    assert_eq!(info.changeset_count, 0);
    assert!(!info.changed);
}

#[test]
fn test_missing_changesets_force_full_copy_and_terminate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    // Changesets disabled: a behind follower can only be served a full
    // copy, and the conversation still terminates.
    let config = DatabaseConfig {
        max_changesets: Some(0),
        ..changeset_config()
    };
    let mut db = WritableDatabase::with_config(&path, Action::Create, config).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    let previous = db.revision();
    db.add_document(&doc(b"beta")).unwrap();
    db.commit().unwrap();
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    leader
        .write_changesets_to(&mut out, &token(previous), false, &mut info)
        .unwrap();

    let messages = drain_messages(&out);
    assert_eq!(info.fullcopy_count, 1);
    assert_eq!(messages.last().unwrap().0, ReplyType::EndOfChanges);
}

#[test]
fn test_explicit_whole_db_request() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let mut db = WritableDatabase::with_config(&path, Action::Create, changeset_config()).unwrap();
    db.add_document(&doc(b"alpha")).unwrap();
    db.commit().unwrap();
    let current = db.revision();
    drop(db);

    let mut leader = Database::open(&path).unwrap();
    let mut out = Vec::new();
    let mut info = ReplicationInfo::default();
    // Even with a perfectly good token, the follower can demand a full
    // copy (e.g. after detecting local corruption).
    leader
        .write_changesets_to(&mut out, &token(current), true, &mut info)
        .unwrap();

    assert_eq!(info.fullcopy_count, 1);
    let messages = drain_messages(&out);
    assert_eq!(messages[0].0, ReplyType::DbHeader);
    assert_eq!(messages.last().unwrap().0, ReplyType::EndOfChanges);
}
