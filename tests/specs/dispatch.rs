//! S1 simple dispatch, S2 priority preemption, S6 reprioritize in flight.

use crate::prelude::*;
use async_trait::async_trait;
use hive_core::{Priority, Task, TaskStatus};
use hive_store::Store;
use hive_worker::{ExecuteError, Executor, Worker, WorkerConfig};
use std::sync::Arc;

struct OkExecutor;

#[async_trait]
impl Executor for OkExecutor {
    async fn process(&self, _task: &Task) -> Result<serde_json::Value, ExecuteError> {
        Ok(serde_json::json!({"ok": true}))
    }
}

#[tokio::test]
async fn s1_simple_dispatch() {
    let s = stack();

    let t1 = Task::builder("t1", "A")
        .payload(serde_json::json!({"x": 1}))
        .timeout_ms(5_000)
        .max_retries(2)
        .build(&s.clock);
    s.engine.enqueue(&t1).await.unwrap();

    let worker = Worker::spawn(
        s.store.clone() as Arc<dyn Store>,
        s.clock.clone(),
        s.config.clone(),
        WorkerConfig::new("w1", "A").with_claim_wait_ms(50),
        Arc::new(OkExecutor),
    )
    .await
    .unwrap();

    wait_until("t1 to complete", || async {
        s.engine
            .task("A", "t1")
            .await
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    })
    .await;

    let depths = s.engine.depths("A").await.unwrap();
    assert_eq!(depths.pending, 0);
    assert_eq!(depths.processing, 0);

    worker.shutdown().await;
}

#[tokio::test]
async fn s2_priority_preemption() {
    let s = stack();

    s.engine
        .enqueue(&task("t_low", "A", Priority::Low, &s.clock))
        .await
        .unwrap();
    s.clock.advance_ms(10);
    s.engine
        .enqueue(&task("t_crit", "A", Priority::Critical, &s.clock))
        .await
        .unwrap();

    let first = s.engine.claim("A", "w1").await.unwrap().unwrap();
    assert_eq!(first.id, "t_crit");
}

#[tokio::test]
async fn s6_reprioritize_in_flight() {
    let s = stack();

    s.engine
        .enqueue(&task("t6", "A", Priority::Low, &s.clock))
        .await
        .unwrap();
    s.clock.advance_ms(5);
    s.engine
        .enqueue(&task("t_norm", "A", Priority::Normal, &s.clock))
        .await
        .unwrap();
    s.clock.advance_ms(5);
    s.engine
        .enqueue(&task("t_high", "A", Priority::High, &s.clock))
        .await
        .unwrap();

    // Before any claim, bump t6 to critical
    s.engine
        .reprioritize("A", "t6", Priority::Critical, "operator bump")
        .await
        .unwrap();

    let first = s.engine.claim("A", "w1").await.unwrap().unwrap();
    assert_eq!(first.id, "t6");
    assert_eq!(first.priority, Priority::Critical);
}
