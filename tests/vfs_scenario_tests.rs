mod common;

use std::sync::Arc;

use common::{RecordingSync, TestDrive};
use drivefuse::vfs::{ConflictKind, FsError, ROOT_ID};
use fuser::FileType;

/// mkdir A, create A/b.txt, write "hello", read it back
#[test]
fn test_create_write_read_in_new_folder() {
    let drive = TestDrive::new();
    let sync = Arc::new(RecordingSync::default());
    let adapter = drive.adapter(sync.clone());

    let a = adapter.make_directory(ROOT_ID, "A").unwrap();
    let b = adapter.create(a.id, "b.txt").unwrap();
    assert_eq!(adapter.write(b.id, 0, b"hello").unwrap(), 5);

    let node = adapter.lookup(a.id, "b.txt").unwrap();
    assert_eq!(node.id, b.id);
    assert_eq!(adapter.attributes(&node).size, 5);
    assert_eq!(adapter.read(&node, 0, 5).unwrap(), b"hello");
    assert_eq!(adapter.read(&node, 1, 100).unwrap(), b"ello");

    assert_eq!(*sync.dirty.lock().unwrap(), vec![b.id]);
    assert!(sync.fetches.lock().unwrap().is_empty());
}

#[test]
fn test_listing_reports_kinds() {
    let drive = TestDrive::new();
    let adapter = drive.adapter(Arc::new(RecordingSync::default()));

    let folder = adapter.make_directory(ROOT_ID, "docs").unwrap();
    let file = adapter.create(ROOT_ID, "notes.txt").unwrap();

    let entries: Vec<_> = adapter.read_directory(ROOT_ID).unwrap().collect();
    assert_eq!(entries.len(), 2);
    let docs = entries.iter().find(|e| e.name == "docs").unwrap();
    assert_eq!(docs.id, folder.id);
    assert_eq!(docs.kind, FileType::Directory);
    let notes = entries.iter().find(|e| e.name == "notes.txt").unwrap();
    assert_eq!(notes.id, file.id);
    assert_eq!(notes.kind, FileType::RegularFile);

    assert_eq!(adapter.read_directory(folder.id).unwrap().count(), 0);
}

#[test]
fn test_rename_keeps_content_and_identity() {
    let drive = TestDrive::new();
    let adapter = drive.adapter(Arc::new(RecordingSync::default()));

    let src = adapter.make_directory(ROOT_ID, "src").unwrap();
    let dst = adapter.make_directory(ROOT_ID, "dst").unwrap();
    let file = adapter.create(src.id, "a.txt").unwrap();
    adapter.write(file.id, 0, b"payload").unwrap();

    adapter.rename(src.id, "a.txt", dst.id, "b.txt").unwrap();

    assert_eq!(adapter.lookup(src.id, "a.txt"), Err(FsError::NotFound));
    let moved = adapter.lookup(dst.id, "b.txt").unwrap();
    assert_eq!(moved.id, file.id);
    assert_eq!(adapter.read(&moved, 0, 64).unwrap(), b"payload");
}

#[test]
fn test_folder_cannot_move_into_itself() {
    let drive = TestDrive::new();
    let adapter = drive.adapter(Arc::new(RecordingSync::default()));

    let outer = adapter.make_directory(ROOT_ID, "outer").unwrap();
    let inner = adapter.make_directory(outer.id, "inner").unwrap();

    assert_eq!(
        adapter.rename(ROOT_ID, "outer", inner.id, "loop"),
        Err(FsError::Conflict(ConflictKind::InvalidMove))
    );
    assert_eq!(adapter.lookup(ROOT_ID, "outer").unwrap().id, outer.id);
}

#[test]
fn test_remove_non_empty_folder_fails() {
    let drive = TestDrive::new();
    let adapter = drive.adapter(Arc::new(RecordingSync::default()));

    let dir = adapter.make_directory(ROOT_ID, "full").unwrap();
    adapter.create(dir.id, "keep.txt").unwrap();

    assert_eq!(
        adapter.remove(ROOT_ID, "full", true),
        Err(FsError::Conflict(ConflictKind::NotEmpty))
    );

    adapter.remove(dir.id, "keep.txt", false).unwrap();
    adapter.remove(ROOT_ID, "full", true).unwrap();
    assert_eq!(adapter.lookup(ROOT_ID, "full"), Err(FsError::NotFound));
}

#[test]
fn test_reserved_names_are_invisible() {
    let drive = TestDrive::new();
    let adapter = drive.adapter(Arc::new(RecordingSync::default()));

    for name in [".DS_Store", "._.", ".hidden", "mach_kernel", "Backups.backupdb"] {
        assert_eq!(adapter.lookup(ROOT_ID, name), Err(FsError::NotFound));
        assert!(adapter.is_reserved(name), "{} should be reserved", name);
    }
    assert!(!adapter.is_reserved("report.pdf"));
}

#[test]
fn test_truncate_and_extend() {
    let drive = TestDrive::new();
    let adapter = drive.adapter(Arc::new(RecordingSync::default()));

    let file = adapter.create(ROOT_ID, "grow.bin").unwrap();
    adapter.write(file.id, 0, b"abcdef").unwrap();

    let shrunk = adapter.truncate(file.id, 3).unwrap();
    assert_eq!(shrunk.size(), 3);
    assert_eq!(adapter.read(&shrunk, 0, 10).unwrap(), b"abc");

    let grown = adapter.truncate(file.id, 5).unwrap();
    assert_eq!(adapter.read(&grown, 0, 10).unwrap(), b"abc\0\0");
}

#[test]
fn test_local_changes_survive_restart() {
    let mut drive = TestDrive::new();
    let id = {
        let adapter = drive.adapter(Arc::new(RecordingSync::default()));
        let dir = adapter.make_directory(ROOT_ID, "kept").unwrap();
        let file = adapter.create(dir.id, "draft.md").unwrap();
        adapter.write(file.id, 0, b"# draft").unwrap();
        file.id
    };
    drive.meta.save().unwrap();
    drive.reopen();

    let adapter = drive.adapter(Arc::new(RecordingSync::default()));
    let dir = adapter.lookup(ROOT_ID, "kept").unwrap();
    let file = adapter.lookup(dir.id, "draft.md").unwrap();
    assert_eq!(file.id, id);
    assert!(file.content().unwrap().dirty);
    assert_eq!(adapter.read(&file, 0, 64).unwrap(), b"# draft");
}
