//! S5 consensus gate: approval, snapshot, expiry variant.

use crate::prelude::*;
use hive_core::{AgentId, ApprovalStatus, FabricError};
use hive_gate::{ConsensusGate, SnapshotStore};
use std::path::PathBuf;

struct GateFixture {
    gate: ConsensusGate<hive_core::FakeClock>,
    work: tempfile::TempDir,
    _snaps: tempfile::TempDir,
}

fn gate_fixture(s: &Stack) -> GateFixture {
    let snaps = tempfile::TempDir::new().unwrap();
    GateFixture {
        gate: ConsensusGate::new(
            s.store.clone() as std::sync::Arc<dyn hive_store::Store>,
            s.clock.clone(),
            SnapshotStore::new(snaps.path()),
        ),
        work: tempfile::TempDir::new().unwrap(),
        _snaps: snaps,
    }
}

fn target(f: &GateFixture, name: &str, content: &[u8]) -> PathBuf {
    let path = f.work.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn s5_consensus_gate_grants_and_executes() {
    let s = stack();
    let f = gate_fixture(&s);
    let f1 = target(&f, "f1", b"one");
    let f2 = target(&f, "f2", b"two");

    let request = f
        .gate
        .propose(
            &AgentId::new("init"),
            "delete",
            vec![f1.clone(), f2.clone()],
            "cleanup",
            2,
            2_000,
        )
        .await
        .unwrap();

    assert_eq!(
        f.gate
            .approve(&request.request_id, &AgentId::new("r1"))
            .await
            .unwrap(),
        ApprovalStatus::Pending
    );
    assert_eq!(
        f.gate
            .approve(&request.request_id, &AgentId::new("r2"))
            .await
            .unwrap(),
        ApprovalStatus::Approved
    );

    // Only now may the initiator execute, referencing the snapshot
    let snapshot_id = f.gate.authorize(&request.request_id).await.unwrap();
    std::fs::remove_file(&f1).unwrap();
    std::fs::remove_file(&f2).unwrap();
    assert!(!f1.exists() && !f2.exists());

    // The snapshot manifest lists both targets, so rollback is possible
    let manifest = f.gate.snapshots().manifest(&snapshot_id).unwrap();
    assert_eq!(manifest.entries.len(), 2);
    assert!(manifest.entry_for(&f1).is_some());
    assert!(manifest.entry_for(&f2).is_some());

    f.gate.snapshots().restore(&snapshot_id).unwrap();
    assert_eq!(std::fs::read(&f1).unwrap(), b"one");
    assert_eq!(std::fs::read(&f2).unwrap(), b"two");
}

#[tokio::test]
async fn s5_variant_insufficient_approvals_expire() {
    let s = stack();
    let f = gate_fixture(&s);
    let f1 = target(&f, "f1", b"one");

    let request = f
        .gate
        .propose(
            &AgentId::new("init"),
            "delete",
            vec![f1.clone()],
            "cleanup",
            2,
            2_000,
        )
        .await
        .unwrap();

    f.gate
        .approve(&request.request_id, &AgentId::new("r1"))
        .await
        .unwrap();

    s.clock.advance_ms(2_001);
    f.gate.expire_overdue().await.unwrap();

    let stored = f.gate.status(&request.request_id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Expired);

    // Deletion must not occur
    assert!(matches!(
        f.gate.authorize(&request.request_id).await,
        Err(FabricError::Conflict(_))
    ));
    assert!(f1.exists());
}

#[tokio::test]
async fn approved_record_always_has_a_snapshot() {
    // Property 10: a proposal whose snapshot fails leaves no record, so
    // there is no window where an approved record lacks a rollback point.
    let s = stack();
    let f = gate_fixture(&s);
    let ghost = f.work.path().join("ghost");

    let err = f
        .gate
        .propose(
            &AgentId::new("init"),
            "delete",
            vec![ghost],
            "cleanup",
            1,
            2_000,
        )
        .await;
    assert!(err.is_err());
    assert!(f.gate.active_requests().await.unwrap().is_empty());

    // And an approved request passes the snapshot existence check
    let real = target(&f, "real", b"data");
    let request = f
        .gate
        .propose(&AgentId::new("init"), "delete", vec![real], "cleanup", 1, 2_000)
        .await
        .unwrap();
    f.gate
        .approve(&request.request_id, &AgentId::new("r1"))
        .await
        .unwrap();
    let snapshot_id = f.gate.authorize(&request.request_id).await.unwrap();
    assert!(f.gate.snapshots().exists(&snapshot_id));
}
