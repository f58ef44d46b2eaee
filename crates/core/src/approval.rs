// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval requests and snapshot manifests for the consensus gate.
//!
//! A destructive operation may only execute once a matching approval
//! record reached `approved` AND its snapshot exists. The snapshot is taken
//! before the request is opened, so a crash can never leave an approved
//! record without a rollback point.

use crate::agent::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

crate::id_type! {
    /// Unique identifier for a consensus request.
    pub struct RequestId;
}

crate::id_type! {
    /// Unique identifier for a snapshot.
    pub struct SnapshotId;
}

/// Outcome state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A proposal for a destructive operation, stored in `consensus:req:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: RequestId,
    /// Human-readable operation name (e.g. "delete", "bulk_rename")
    pub operation: String,
    /// Files or resources the operation would touch
    pub targets: Vec<PathBuf>,
    pub reason: String,
    pub initiator: AgentId,
    pub required_approvals: u32,
    /// Epoch milliseconds after which the request expires
    pub deadline_ms: u64,
    #[serde(default)]
    pub approvals: BTreeSet<AgentId>,
    #[serde(default)]
    pub rejections: BTreeSet<AgentId>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    /// First rejection reason, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl ApprovalRequest {
    /// True once enough distinct reviewers approved.
    pub fn has_quorum(&self) -> bool {
        self.approvals.len() as u32 >= self.required_approvals
    }

    /// True if `agent` already voted either way.
    pub fn has_voted(&self, agent: &AgentId) -> bool {
        self.approvals.contains(agent) || self.rejections.contains(agent)
    }
}

/// One file captured in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Original absolute path
    pub source: PathBuf,
    /// File name of the stored copy inside the snapshot directory
    pub stored_as: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// SHA-256 hex of the uncompressed content
    pub sha256: String,
}

/// Manifest written alongside a snapshot's stored copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: SnapshotId,
    pub created_at_ms: u64,
    pub entries: Vec<SnapshotEntry>,
}

impl SnapshotManifest {
    /// Look up the entry for a source path.
    pub fn entry_for(&self, source: &std::path::Path) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.source == source)
    }
}

#[cfg(test)]
#[path = "approval_tests.rs"]
mod tests;
