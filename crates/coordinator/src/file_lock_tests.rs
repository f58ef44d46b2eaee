// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hive_core::{FakeClock, LockMode};
use hive_store::MemoryStore;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

fn setup() -> (ResourceCoordinator<FakeClock>, FakeClock) {
    let clock = FakeClock::at(1_700_000_000_000);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (ResourceCoordinator::new(store, clock.clone()), clock)
}

fn agent(id: &str) -> AgentId {
    AgentId::new(id)
}

#[tokio::test]
async fn readers_share_writer_excluded() {
    let (coord, _) = setup();

    let r1 = coord
        .acquire("/hive/a/b", LockMode::Read, &agent("a1"), 60_000, 0)
        .await
        .unwrap();
    let r2 = coord
        .acquire("/hive/a/b", LockMode::Read, &agent("a2"), 60_000, 0)
        .await
        .unwrap();

    // Writer is busy while readers hold
    let busy = coord
        .acquire("/hive/a/b", LockMode::Write, &agent("a3"), 60_000, 0)
        .await;
    assert!(matches!(busy, Err(FabricError::Busy(_))));

    coord.release(&r1).await.unwrap();
    coord.release(&r2).await.unwrap();

    let w = coord
        .acquire("/hive/a/b", LockMode::Write, &agent("a3"), 60_000, 0)
        .await
        .unwrap();

    // Readers are now excluded
    let busy = coord
        .acquire("/hive/a/b", LockMode::Read, &agent("a4"), 60_000, 0)
        .await;
    assert!(matches!(busy, Err(FabricError::Busy(_))));

    coord.release(&w).await.unwrap();
    coord
        .acquire("/hive/a/b", LockMode::Read, &agent("a4"), 60_000, 0)
        .await
        .unwrap();
}

#[tokio::test]
async fn write_is_exclusive_of_writers() {
    let (coord, _) = setup();
    let _w = coord
        .acquire("/hive/x", LockMode::Write, &agent("a1"), 60_000, 0)
        .await
        .unwrap();
    let busy = coord
        .acquire("/hive/x", LockMode::Write, &agent("a2"), 60_000, 0)
        .await;
    assert!(matches!(busy, Err(FabricError::Busy(_))));
}

#[tokio::test]
async fn reacquire_by_writer_refreshes_same_fence() {
    let (coord, clock) = setup();
    let w1 = coord
        .acquire("/hive/x", LockMode::Write, &agent("a1"), 1_000, 0)
        .await
        .unwrap();
    clock.advance_ms(500);
    let w2 = coord
        .acquire("/hive/x", LockMode::Write, &agent("a1"), 1_000, 0)
        .await
        .unwrap();
    assert_eq!(w1.fence, w2.fence);
    assert!(w2.expires_at_ms > w1.expires_at_ms);
}

#[tokio::test]
async fn fence_tokens_strictly_increase() {
    let (coord, _) = setup();
    let mut last = 0;
    for i in 0..5 {
        let holder = agent(&format!("a{}", i));
        let handle = coord
            .acquire("/hive/x", LockMode::Write, &holder, 60_000, 0)
            .await
            .unwrap();
        assert!(handle.fence > last, "fence {} not > {}", handle.fence, last);
        last = handle.fence;
        coord.release(&handle).await.unwrap();
    }
}

#[tokio::test]
async fn release_with_stale_fence_is_rejected() {
    let (coord, _) = setup();
    let w = coord
        .acquire("/hive/x", LockMode::Write, &agent("a1"), 60_000, 0)
        .await
        .unwrap();
    coord.release(&w).await.unwrap();

    // Second release of the same handle is stale, and a no-op
    assert!(matches!(
        coord.release(&w).await,
        Err(FabricError::Stale(_))
    ));
}

#[tokio::test]
async fn expired_lock_is_treated_as_released() {
    let (coord, clock) = setup();
    let w = coord
        .acquire("/hive/x", LockMode::Write, &agent("a1"), 100, 0)
        .await
        .unwrap();

    clock.advance_ms(101);

    // A new writer gets in past the expired holder
    let w2 = coord
        .acquire("/hive/x", LockMode::Write, &agent("a2"), 60_000, 0)
        .await
        .unwrap();
    assert!(w2.fence > w.fence);

    // The expired holder's release is stale and must not disturb w2
    assert!(matches!(coord.release(&w).await, Err(FabricError::Stale(_))));
    let inspection = coord.inspect("/hive/x").await.unwrap();
    assert_eq!(inspection.writer.as_deref(), Some("a2"));
}

#[tokio::test]
async fn expired_reader_no_longer_blocks_writer() {
    let (coord, clock) = setup();
    coord
        .acquire("/hive/x", LockMode::Read, &agent("a1"), 100, 0)
        .await
        .unwrap();

    clock.advance_ms(101);
    coord
        .acquire("/hive/x", LockMode::Write, &agent("a2"), 60_000, 0)
        .await
        .unwrap();
}

#[tokio::test]
async fn waiting_acquire_succeeds_after_release() {
    let (coord, _) = setup();
    let r = coord
        .acquire("/hive/x", LockMode::Read, &agent("a1"), 60_000, 0)
        .await
        .unwrap();

    let waiter = coord.clone();
    let handle = tokio::spawn(async move {
        waiter
            .acquire("/hive/x", LockMode::Write, &agent("a2"), 60_000, 1_000)
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    coord.release(&r).await.unwrap();

    let w = handle.await.unwrap().unwrap();
    assert_eq!(w.holder, "a2");
}

#[tokio::test]
async fn waiting_acquire_times_out_busy() {
    let (coord, _) = setup();
    let _r = coord
        .acquire("/hive/x", LockMode::Read, &agent("a1"), 60_000, 0)
        .await
        .unwrap();

    let result = coord
        .acquire("/hive/x", LockMode::Write, &agent("a2"), 60_000, 120)
        .await;
    assert!(matches!(result, Err(FabricError::Busy(_))));
}

#[tokio::test]
async fn equivalent_paths_share_one_lock() {
    let (coord, _) = setup();
    let _w = coord
        .acquire("/hive/dir/../dir/file", LockMode::Write, &agent("a1"), 60_000, 0)
        .await
        .unwrap();
    let busy = coord
        .acquire("/hive/dir/file", LockMode::Write, &agent("a2"), 60_000, 0)
        .await;
    assert!(matches!(busy, Err(FabricError::Busy(_))));
}

#[tokio::test]
async fn inspect_reports_holders() {
    let (coord, _) = setup();
    assert_eq!(coord.inspect("/hive/x").await.unwrap(), LockInspection::default());

    coord
        .acquire("/hive/x", LockMode::Read, &agent("a1"), 60_000, 0)
        .await
        .unwrap();
    coord
        .acquire("/hive/x", LockMode::Read, &agent("a2"), 60_000, 0)
        .await
        .unwrap();

    let inspection = coord.inspect("/hive/x").await.unwrap();
    assert_eq!(inspection.writer, None);
    assert_eq!(inspection.reader_count, 2);
    assert_eq!(inspection.fence, 2);
}

#[tokio::test]
async fn registered_agent_descriptor_tracks_held_locks() {
    let (coord, _) = setup();
    let resource = hive_core::ResourceKey::file("/hive/x");

    // Seed a registry entry the way the registry would write it
    let desc = hive_core::AgentDescriptor::new("a1", "render", 0);
    coord
        .store()
        .hset(
            hive_core::keys::AGENTS_REGISTRY,
            "a1",
            &serde_json::to_string(&desc).unwrap(),
        )
        .await
        .unwrap();

    let w = coord
        .acquire("/hive/x", LockMode::Write, &agent("a1"), 60_000, 0)
        .await
        .unwrap();

    let raw = coord
        .store()
        .hget(hive_core::keys::AGENTS_REGISTRY, "a1")
        .await
        .unwrap()
        .unwrap();
    let stored: hive_core::AgentDescriptor = serde_json::from_str(&raw).unwrap();
    assert!(stored.held_locks.contains(resource.digest()));

    coord.release(&w).await.unwrap();
    let raw = coord
        .store()
        .hget(hive_core::keys::AGENTS_REGISTRY, "a1")
        .await
        .unwrap()
        .unwrap();
    let stored: hive_core::AgentDescriptor = serde_json::from_str(&raw).unwrap();
    assert!(stored.held_locks.is_empty());
}

// ---------------------------------------------------------------------------
// fuzz: any interleaving respects the readers-writer invariant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    AcquireRead(usize),
    AcquireWrite(usize),
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize).prop_map(Op::AcquireRead),
        (0..4usize).prop_map(Op::AcquireWrite),
        (0..4usize).prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rw_invariant_holds_under_any_interleaving(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async move {
            let (coord, _) = setup();
            let mut held: Vec<Option<FileLockHandle>> = vec![None, None, None, None];
            let mut last_fence = 0u64;

            for op in ops {
                match op {
                    Op::AcquireRead(i) | Op::AcquireWrite(i) if held[i].is_some() => {}
                    Op::AcquireRead(i) => {
                        let id = agent(&format!("a{}", i));
                        match coord.acquire("/hive/fuzz", LockMode::Read, &id, 60_000, 0).await {
                            Ok(handle) => {
                                prop_assert!(handle.fence > last_fence);
                                last_fence = handle.fence;
                                held[i] = Some(handle);
                            }
                            Err(FabricError::Busy(_)) => {}
                            Err(e) => return Err(TestCaseError::fail(format!("acquire read: {}", e))),
                        }
                    }
                    Op::AcquireWrite(i) => {
                        let id = agent(&format!("a{}", i));
                        match coord.acquire("/hive/fuzz", LockMode::Write, &id, 60_000, 0).await {
                            Ok(handle) => {
                                prop_assert!(handle.fence > last_fence);
                                last_fence = handle.fence;
                                held[i] = Some(handle);
                            }
                            Err(FabricError::Busy(_)) => {}
                            Err(e) => return Err(TestCaseError::fail(format!("acquire write: {}", e))),
                        }
                    }
                    Op::Release(i) => {
                        if let Some(handle) = held[i].take() {
                            coord.release(&handle).await
                                .map_err(|e| TestCaseError::fail(format!("release: {}", e)))?;
                        }
                    }
                }

                // Invariant: writer present implies zero readers
                let inspection = coord.inspect("/hive/fuzz").await
                    .map_err(|e| TestCaseError::fail(format!("inspect: {}", e)))?;
                if inspection.writer.is_some() {
                    prop_assert_eq!(inspection.reader_count, 0);
                }

                // Model cross-check against what we believe is held
                let model_writers = held.iter().flatten().filter(|h| h.mode == LockMode::Write).count();
                let model_readers = held.iter().flatten().filter(|h| h.mode == LockMode::Read).count();
                prop_assert!(model_writers <= 1);
                prop_assert_eq!(inspection.writer.is_some(), model_writers == 1);
                prop_assert_eq!(inspection.reader_count, model_readers as u64);
            }
            Ok(())
        })?;
    }
}
