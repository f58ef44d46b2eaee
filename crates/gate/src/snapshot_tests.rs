// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

fn write_target(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn create_writes_manifest_and_copies() {
    let work = TempDir::new().unwrap();
    let snaps = TempDir::new().unwrap();
    let store = SnapshotStore::new(snaps.path());

    let f1 = write_target(&work, "f1.txt", b"hello");
    let f2 = write_target(&work, "f2.txt", b"world!");

    let id = SnapshotId::new("snap-1");
    let manifest = store
        .create(&id, &[f1.clone(), f2.clone()], 1_000)
        .unwrap();

    assert!(store.exists(&id));
    assert_eq!(manifest.entries.len(), 2);
    assert_eq!(manifest.created_at_ms, 1_000);
    assert_eq!(manifest.entries[0].source, f1);
    assert_eq!(manifest.entries[0].size, 5);
    assert_eq!(manifest.entries[1].size, 6);
    assert_eq!(manifest.entries[0].sha256.len(), 64);

    // Manifest reloads identically
    let loaded = store.manifest(&id).unwrap();
    assert_eq!(loaded.entries.len(), 2);
    assert!(loaded.entry_for(&f2).is_some());
}

#[test]
fn missing_target_fails_without_half_snapshot() {
    let work = TempDir::new().unwrap();
    let snaps = TempDir::new().unwrap();
    let store = SnapshotStore::new(snaps.path());

    let f1 = write_target(&work, "f1.txt", b"hello");
    let missing = work.path().join("missing.txt");

    let id = SnapshotId::new("snap-1");
    let err = store.create(&id, &[f1, missing], 1_000);
    assert!(matches!(err, Err(SnapshotError::MissingTarget(_))));
    assert!(!store.exists(&id));
}

#[test]
fn restore_brings_deleted_files_back() {
    let work = TempDir::new().unwrap();
    let snaps = TempDir::new().unwrap();
    let store = SnapshotStore::new(snaps.path());

    let f1 = write_target(&work, "f1.txt", b"precious data");
    let id = SnapshotId::new("snap-1");
    store.create(&id, &[f1.clone()], 1_000).unwrap();

    // The destructive act
    fs::remove_file(&f1).unwrap();
    assert!(!f1.exists());

    let restored = store.restore(&id).unwrap();
    assert_eq!(restored, 1);
    assert_eq!(fs::read(&f1).unwrap(), b"precious data");
}

#[test]
fn restore_unknown_snapshot_is_notfound() {
    let snaps = TempDir::new().unwrap();
    let store = SnapshotStore::new(snaps.path());
    let err = store.restore(&SnapshotId::new("ghost"));
    assert!(matches!(err, Err(SnapshotError::NotFound(_))));
}

#[test]
fn empty_target_list_is_a_valid_snapshot() {
    let snaps = TempDir::new().unwrap();
    let store = SnapshotStore::new(snaps.path());
    let id = SnapshotId::new("snap-empty");
    let manifest = store.create(&id, &[], 1_000).unwrap();
    assert!(manifest.entries.is_empty());
    assert!(store.exists(&id));
}
