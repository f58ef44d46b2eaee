// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hive_core::{FakeClock, SequenceMinter};
use hive_store::MemoryStore;
use tempfile::TempDir;

struct Fixture {
    gate: ConsensusGate<FakeClock, SequenceMinter>,
    clock: FakeClock,
    work: TempDir,
    _snaps: TempDir,
}

fn setup() -> Fixture {
    let clock = FakeClock::at(1_700_000_000_000);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let snaps = TempDir::new().unwrap();
    let gate = ConsensusGate::with_minter(
        store,
        clock.clone(),
        SequenceMinter::new("req"),
        SnapshotStore::new(snaps.path()),
    );
    Fixture {
        gate,
        clock,
        work: TempDir::new().unwrap(),
        _snaps: snaps,
    }
}

fn target(f: &Fixture, name: &str) -> PathBuf {
    let path = f.work.path().join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    path
}

async fn propose_two_file_delete(f: &Fixture) -> ApprovalRequest {
    let f1 = target(f, "f1");
    let f2 = target(f, "f2");
    f.gate
        .propose(
            &AgentId::new("w1"),
            "delete",
            vec![f1, f2],
            "cleanup",
            2,
            2_000,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn quorum_approves_and_authorizes() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;
    assert_eq!(request.status, ApprovalStatus::Pending);
    let snapshot_id = request.snapshot_id.clone().unwrap();

    let status = f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();
    assert_eq!(status, ApprovalStatus::Pending);

    let status = f.gate.approve(&request.request_id, &AgentId::new("r2")).await.unwrap();
    assert_eq!(status, ApprovalStatus::Approved);

    let authorized = f.gate.authorize(&request.request_id).await.unwrap();
    assert_eq!(authorized, snapshot_id);

    // Snapshot manifest lists both targets
    let manifest = f.gate.snapshots().manifest(&snapshot_id).unwrap();
    assert_eq!(manifest.entries.len(), 2);

    // Execute the destructive act, then roll back from the snapshot
    for entry in &manifest.entries {
        std::fs::remove_file(&entry.source).unwrap();
    }
    f.gate.snapshots().restore(&snapshot_id).unwrap();
    for entry in &manifest.entries {
        assert!(entry.source.exists());
    }
}

#[tokio::test]
async fn reviewer_counts_once() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;

    f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();
    // The same reviewer voting again must not reach quorum
    let status = f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();
    assert_eq!(status, ApprovalStatus::Pending);

    let stored = f.gate.status(&request.request_id).await.unwrap();
    assert_eq!(stored.approvals.len(), 1);
}

#[tokio::test]
async fn initiator_cannot_self_approve() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;

    let err = f.gate.approve(&request.request_id, &AgentId::new("w1")).await;
    assert!(matches!(err, Err(FabricError::Conflict(_))));
}

#[tokio::test]
async fn single_rejection_denies() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;

    f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();
    let status = f
        .gate
        .reject(&request.request_id, &AgentId::new("r2"), "too risky")
        .await
        .unwrap();
    assert_eq!(status, ApprovalStatus::Rejected);

    let stored = f.gate.status(&request.request_id).await.unwrap();
    assert_eq!(stored.rejection_reason.as_deref(), Some("too risky"));

    let err = f.gate.authorize(&request.request_id).await;
    assert!(matches!(err, Err(FabricError::Conflict(_))));
}

#[tokio::test]
async fn votes_after_settlement_do_not_change_outcome() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;
    f.gate
        .reject(&request.request_id, &AgentId::new("r1"), "no")
        .await
        .unwrap();

    let status = f.gate.approve(&request.request_id, &AgentId::new("r2")).await.unwrap();
    assert_eq!(status, ApprovalStatus::Rejected);
}

#[tokio::test]
async fn insufficient_approvals_expire_at_deadline() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;

    f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();

    f.clock.advance_ms(2_001);
    let expired = f.gate.expire_overdue().await.unwrap();
    assert_eq!(expired, vec![request.request_id.clone()]);

    let stored = f.gate.status(&request.request_id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Expired);

    // Deletion must not occur: authorize refuses
    assert!(matches!(
        f.gate.authorize(&request.request_id).await,
        Err(FabricError::Conflict(_))
    ));
}

#[tokio::test]
async fn late_vote_triggers_expiry() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;

    f.clock.advance_ms(2_001);
    let status = f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();
    assert_eq!(status, ApprovalStatus::Expired);
}

#[tokio::test]
async fn propose_fails_when_snapshot_fails() {
    let f = setup();
    let missing = f.work.path().join("never-existed");

    let err = f
        .gate
        .propose(
            &AgentId::new("w1"),
            "delete",
            vec![missing],
            "cleanup",
            1,
            2_000,
        )
        .await;
    assert!(matches!(err, Err(FabricError::NotFound(_))));

    // No request record was opened
    assert!(f.gate.active_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn wait_for_decision_sees_grant() {
    let f = setup();
    let request = propose_two_file_delete(&f).await;
    let request_id = request.request_id.clone();

    let gate = ConsensusGate::with_minter(
        Arc::clone(f.gate.store()),
        f.clock.clone(),
        SequenceMinter::new("other"),
        SnapshotStore::new(f._snaps.path()),
    );
    let waiter = tokio::spawn(async move { gate.wait_for_decision(&request_id, 2_000).await });

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    f.gate.approve(&request.request_id, &AgentId::new("r1")).await.unwrap();
    f.gate.approve(&request.request_id, &AgentId::new("r2")).await.unwrap();

    let status = waiter.await.unwrap().unwrap();
    assert_eq!(status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn active_requests_lists_only_pending() {
    let f = setup();
    let first = propose_two_file_delete(&f).await;
    let second = propose_two_file_delete(&f).await;

    f.gate
        .reject(&first.request_id, &AgentId::new("r1"), "no")
        .await
        .unwrap();

    let active = f.gate.active_requests().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].request_id, second.request_id);
}

#[tokio::test]
async fn unknown_request_is_notfound() {
    let f = setup();
    assert!(matches!(
        f.gate.approve(&RequestId::new("ghost"), &AgentId::new("r1")).await,
        Err(FabricError::NotFound(_))
    ));
    assert!(matches!(
        f.gate.status(&RequestId::new("ghost")).await,
        Err(FabricError::NotFound(_))
    ));
}
