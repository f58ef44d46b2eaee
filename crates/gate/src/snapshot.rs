// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for pre-destruction backups.
//!
//! A snapshot is a directory `{root}/{snapshot_id}/` holding one
//! zstd-compressed copy per target file plus a `manifest.json` describing
//! sources, sizes, and checksums. The manifest is written last, to a
//! `.tmp` path then renamed, so a snapshot with a readable manifest is
//! complete by construction.

use hive_core::approval::{SnapshotEntry, SnapshotManifest};
use hive_core::SnapshotId;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Compression level for stored copies.
const ZSTD_LEVEL: i32 = 3;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("target does not exist: {0}")]
    MissingTarget(PathBuf),
    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),
}

/// Filesystem-backed snapshot storage.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, id: &SnapshotId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn manifest_path(&self, id: &SnapshotId) -> PathBuf {
        self.dir(id).join("manifest.json")
    }

    /// Snapshot `targets` under `id`. Fails without side effects visible
    /// through [`exists`](Self::exists) if any target is unreadable.
    pub fn create(
        &self,
        id: &SnapshotId,
        targets: &[PathBuf],
        now_ms: u64,
    ) -> Result<SnapshotManifest, SnapshotError> {
        let dir = self.dir(id);
        fs::create_dir_all(&dir)?;

        let mut entries = Vec::with_capacity(targets.len());
        for (index, source) in targets.iter().enumerate() {
            if !source.exists() {
                // Leave no half-snapshot behind
                let _ = fs::remove_dir_all(&dir);
                return Err(SnapshotError::MissingTarget(source.clone()));
            }
            let content = fs::read(source)?;
            let mut hasher = Sha256::new();
            hasher.update(&content);
            let sha256 = hex(&hasher.finalize());

            let stored_as = format!("{}.zst", index);
            let compressed = zstd::encode_all(content.as_slice(), ZSTD_LEVEL)?;
            let stored_path = dir.join(&stored_as);
            let mut file = File::create(&stored_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;

            entries.push(SnapshotEntry {
                source: source.clone(),
                stored_as,
                size: content.len() as u64,
                sha256,
            });
        }

        let manifest = SnapshotManifest {
            snapshot_id: id.clone(),
            created_at_ms: now_ms,
            entries,
        };
        self.save_manifest(&manifest)?;
        info!(snapshot_id = %id, targets = targets.len(), "snapshot created");
        Ok(manifest)
    }

    /// Save manifest atomically (write to .tmp, then rename).
    fn save_manifest(&self, manifest: &SnapshotManifest) -> Result<(), SnapshotError> {
        let path = self.manifest_path(&manifest.snapshot_id);
        let tmp_path = path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, manifest)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// True once a complete snapshot (manifest present) exists.
    pub fn exists(&self, id: &SnapshotId) -> bool {
        self.manifest_path(id).exists()
    }

    /// Load a snapshot's manifest.
    pub fn manifest(&self, id: &SnapshotId) -> Result<SnapshotManifest, SnapshotError> {
        let path = self.manifest_path(id);
        if !path.exists() {
            return Err(SnapshotError::NotFound(id.clone()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Copy every entry back to its source path (the rollback path).
    /// Returns how many files were restored.
    pub fn restore(&self, id: &SnapshotId) -> Result<u64, SnapshotError> {
        let manifest = self.manifest(id)?;
        let dir = self.dir(id);
        let mut restored = 0u64;

        for entry in &manifest.entries {
            let compressed = fs::read(dir.join(&entry.stored_as))?;
            let content = zstd::decode_all(compressed.as_slice())?;

            let mut hasher = Sha256::new();
            hasher.update(&content);
            if hex(&hasher.finalize()) != entry.sha256 {
                warn!(snapshot_id = %id, source = %entry.source.display(), "checksum mismatch on restore");
            }

            if let Some(parent) = entry.source.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&entry.source, &content)?;
            restored += 1;
        }
        info!(snapshot_id = %id, restored, "snapshot restored");
        Ok(restored)
    }
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
