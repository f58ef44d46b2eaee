// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn same_path_same_key() {
    let a = ResourceKey::file("/tmp/hive/a.txt");
    let b = ResourceKey::file("/tmp/hive/a.txt");
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());
}

#[test]
fn dot_segments_fold() {
    let a = ResourceKey::file("/tmp/hive/../hive/a.txt");
    let b = ResourceKey::file("/tmp/hive/./a.txt");
    assert_eq!(a.canonical(), b.canonical());
}

#[test]
fn case_is_preserved() {
    let upper = ResourceKey::file("/tmp/Hive/A.txt");
    let lower = ResourceKey::file("/tmp/hive/a.txt");
    assert_ne!(upper.digest(), lower.digest());
    assert!(upper.canonical().contains("Hive"));
}

#[test]
fn symlinks_resolve_to_target() {
    let dir = std::env::temp_dir().join(format!("hive-lock-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let target = dir.join("target.txt");
    std::fs::write(&target, b"x").unwrap();
    let link = dir.join("link.txt");
    let _ = std::fs::remove_file(&link);
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let via_link = ResourceKey::file(&link);
        let direct = ResourceKey::file(&target);
        assert_eq!(via_link, direct);
    }
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn digest_is_sha256_hex() {
    let key = ResourceKey::file("/definitely/missing/path.txt");
    assert_eq!(key.digest().len(), 64);
    assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn port_keys() {
    let key = ResourceKey::port(8080);
    assert_eq!(key.canonical(), "port:8080");
    assert_ne!(ResourceKey::port(8080), ResourceKey::port(8081));
}

#[test]
fn kind_serde_snake_case() {
    assert_eq!(
        serde_json::to_string(&LockKind::FileWrite).unwrap(),
        "\"file_write\""
    );
    assert_eq!(serde_json::to_string(&LockMode::Read).unwrap(), "\"read\"");
}
