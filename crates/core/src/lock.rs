// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical resource keys for distributed locks.
//!
//! Two paths naming the same file must map to the same lock, so file lock
//! keys are derived from the canonicalized absolute path (symlinks
//! resolved, case preserved) hashed with SHA-256. Port keys are the bare
//! port number.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Kind of distributed lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    FileRead,
    FileWrite,
    Port,
}

/// Requested file lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

/// Canonicalized identity of a lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Canonical path (files) or `port:{n}` (ports)
    canonical: String,
    /// SHA-256 hex of the canonical form, used in the store key
    digest: String,
}

impl ResourceKey {
    /// Build the key for a file path.
    ///
    /// Symlinks are resolved when the path exists; otherwise the path is
    /// normalized lexically (`.` and `..` folded, made absolute against the
    /// current directory) so locks can be taken on files that are about to
    /// be created.
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let canonical = match std::fs::canonicalize(path) {
            Ok(resolved) => resolved,
            Err(_) => normalize_lexically(path),
        };
        let canonical = canonical.to_string_lossy().into_owned();
        let digest = sha256_hex(canonical.as_bytes());
        Self { canonical, digest }
    }

    /// Build the key for a port reservation.
    pub fn port(port: u16) -> Self {
        let canonical = format!("port:{}", port);
        let digest = sha256_hex(canonical.as_bytes());
        Self { canonical, digest }
    }

    /// The canonical resource string.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 hex digest used in `locks:file:{digest}`.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Fold `.`/`..` components and anchor relative paths at the current
/// directory without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(p) => prefix.push(p.as_os_str()),
            Component::RootDir => prefix.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }

    let mut out = prefix;
    for part in parts {
        out.push(part);
    }
    out
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
