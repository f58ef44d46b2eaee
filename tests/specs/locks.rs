//! S4 reader/writer lock over the coordinator.

use crate::prelude::*;
use hive_core::{AgentId, FabricError, LockMode};
use hive_coordinator::ResourceCoordinator;

#[tokio::test]
async fn s4_reader_writer_lock() {
    let s = stack();
    let coord = ResourceCoordinator::new(
        s.store.clone() as std::sync::Arc<dyn hive_store::Store>,
        s.clock.clone(),
    );

    // A1 and A2 share read access
    let r1 = coord
        .acquire("/a/b", LockMode::Read, &AgentId::new("a1"), 60_000, 0)
        .await
        .unwrap();
    let r2 = coord
        .acquire("/a/b", LockMode::Read, &AgentId::new("a2"), 60_000, 0)
        .await
        .unwrap();

    // A3's write request waits 200ms and comes back busy
    let started = std::time::Instant::now();
    let busy = coord
        .acquire("/a/b", LockMode::Write, &AgentId::new("a3"), 60_000, 200)
        .await;
    assert!(matches!(busy, Err(FabricError::Busy(_))));
    assert!(started.elapsed().as_millis() >= 150);

    // Readers release; A3 gets the write lock
    coord.release(&r1).await.unwrap();
    coord.release(&r2).await.unwrap();
    let w3 = coord
        .acquire("/a/b", LockMode::Write, &AgentId::new("a3"), 60_000, 200)
        .await
        .unwrap();

    // A4's read is excluded until A3 releases
    let busy = coord
        .acquire("/a/b", LockMode::Read, &AgentId::new("a4"), 60_000, 100)
        .await;
    assert!(matches!(busy, Err(FabricError::Busy(_))));

    coord.release(&w3).await.unwrap();
    coord
        .acquire("/a/b", LockMode::Read, &AgentId::new("a4"), 60_000, 0)
        .await
        .unwrap();

    let inspection = coord.inspect("/a/b").await.unwrap();
    assert_eq!(inspection.writer, None);
    assert_eq!(inspection.reader_count, 1);
}

#[tokio::test]
async fn waiting_writer_wins_when_readers_leave() {
    let s = stack();
    let coord = ResourceCoordinator::new(
        s.store.clone() as std::sync::Arc<dyn hive_store::Store>,
        s.clock.clone(),
    );

    let r = coord
        .acquire("/a/b", LockMode::Read, &AgentId::new("a1"), 60_000, 0)
        .await
        .unwrap();

    let writer_coord = coord.clone();
    let writer = tokio::spawn(async move {
        writer_coord
            .acquire("/a/b", LockMode::Write, &AgentId::new("a3"), 60_000, 2_000)
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    coord.release(&r).await.unwrap();

    let handle = writer.await.unwrap().unwrap();
    assert_eq!(handle.holder, "a3");
    assert_eq!(handle.mode, LockMode::Write);
}
