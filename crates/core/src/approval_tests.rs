// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::AgentId;
use std::path::Path;

fn request() -> ApprovalRequest {
    ApprovalRequest {
        request_id: RequestId::new("req-1"),
        operation: "delete".to_string(),
        targets: vec![PathBuf::from("/data/f1"), PathBuf::from("/data/f2")],
        reason: "cleanup".to_string(),
        initiator: AgentId::new("w-1"),
        required_approvals: 2,
        deadline_ms: 2_000_000,
        approvals: BTreeSet::new(),
        rejections: BTreeSet::new(),
        status: ApprovalStatus::Pending,
        snapshot_id: Some(SnapshotId::new("snap-1")),
        rejection_reason: None,
    }
}

#[test]
fn quorum_counts_distinct_reviewers() {
    let mut req = request();
    assert!(!req.has_quorum());

    req.approvals.insert(AgentId::new("w-2"));
    assert!(!req.has_quorum());

    // Re-inserting the same reviewer does not advance the tally
    req.approvals.insert(AgentId::new("w-2"));
    assert!(!req.has_quorum());

    req.approvals.insert(AgentId::new("w-3"));
    assert!(req.has_quorum());
}

#[test]
fn voted_either_way() {
    let mut req = request();
    req.approvals.insert(AgentId::new("w-2"));
    req.rejections.insert(AgentId::new("w-3"));

    assert!(req.has_voted(&AgentId::new("w-2")));
    assert!(req.has_voted(&AgentId::new("w-3")));
    assert!(!req.has_voted(&AgentId::new("w-4")));
}

#[test]
fn settled_statuses() {
    assert!(!ApprovalStatus::Pending.is_settled());
    assert!(ApprovalStatus::Approved.is_settled());
    assert!(ApprovalStatus::Rejected.is_settled());
    assert!(ApprovalStatus::Expired.is_settled());
}

#[test]
fn request_roundtrip() {
    let req = request();
    let json = serde_json::to_string(&req).unwrap();
    let parsed: ApprovalRequest = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.request_id, req.request_id);
    assert_eq!(parsed.targets.len(), 2);
    assert_eq!(parsed.snapshot_id, Some(SnapshotId::new("snap-1")));
    assert_eq!(parsed.status, ApprovalStatus::Pending);
}

#[test]
fn manifest_lookup_by_source() {
    let manifest = SnapshotManifest {
        snapshot_id: SnapshotId::new("snap-1"),
        created_at_ms: 1_000,
        entries: vec![SnapshotEntry {
            source: PathBuf::from("/data/f1"),
            stored_as: "0.zst".to_string(),
            size: 12,
            sha256: "ab".repeat(32),
        }],
    };

    assert!(manifest.entry_for(Path::new("/data/f1")).is_some());
    assert!(manifest.entry_for(Path::new("/data/f2")).is_none());
}
