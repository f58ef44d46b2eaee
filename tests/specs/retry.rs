//! S3 lease expiry and retry, retry bound, and the no-loss property.

use crate::prelude::*;
use hive_core::{FabricError, Priority, Task, TaskStatus};

#[tokio::test]
async fn s3_lease_expiry_and_retry() {
    let s = stack();

    let t2 = Task::builder("t2", "A")
        .timeout_ms(500)
        .max_retries(1)
        .build(&s.clock);
    s.engine.enqueue(&t2).await.unwrap();

    // W1 claims, then dies (simulated: it simply never reports back)
    let claimed = s.engine.claim("A", "w1").await.unwrap().unwrap();
    assert_eq!(claimed.attempt, 1);

    // Lease expires; the reaper moves it through backoff into pending
    s.clock.advance_ms(501);
    assert_eq!(s.engine.reap_expired_leases("A").await.unwrap(), 1);
    s.clock.advance_ms(s.config.retry.max_delay_ms() + 1);
    s.engine.promote_due("A").await.unwrap();

    let depths = s.engine.depths("A").await.unwrap();
    assert_eq!(depths.pending, 1);

    // Another worker claims and completes; attempt counter is 2
    let reclaimed = s.engine.claim("A", "w2").await.unwrap().unwrap();
    assert_eq!(reclaimed.attempt, 2);
    s.engine
        .complete("A", "t2", "w2", Some(&serde_json::json!({"ok": true})))
        .await
        .unwrap();

    // No duplicate completion: the dead worker's report is rejected
    assert!(matches!(
        s.engine.complete("A", "t2", "w1", None).await,
        Err(FabricError::Conflict(_))
    ));
    let stored = s.engine.task("A", "t2").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.attempt, 2);
}

#[tokio::test]
async fn retry_bound_is_max_retries_plus_one() {
    let s = stack();

    let t = Task::builder("t1", "A")
        .timeout_ms(500)
        .max_retries(2)
        .build(&s.clock);
    s.engine.enqueue(&t).await.unwrap();

    let mut attempts = 0;
    loop {
        s.clock.advance_ms(s.config.retry.max_delay_ms() + 1);
        s.engine.promote_due("A").await.unwrap();
        let Some(claimed) = s.engine.claim("A", "w1").await.unwrap() else {
            break;
        };
        attempts = claimed.attempt;
        s.engine
            .fail("A", "t1", "w1", "boom", true)
            .await
            .unwrap();
    }

    // max_retries = 2 allows exactly three attempts
    assert_eq!(attempts, 3);
    let stored = s.engine.task("A", "t1").await.unwrap();
    assert_eq!(stored.status, TaskStatus::Dead);
    assert_eq!(s.engine.dead_letter_ids("A").await.unwrap(), vec!["t1"]);
}

/// Property 1: every enqueued task is always in exactly one lifecycle
/// bucket, across a churn of claims, failures, reaps, and completions.
#[tokio::test]
async fn no_task_is_ever_lost_or_duplicated() {
    let s = stack();
    const N: usize = 24;

    for i in 0..N {
        let priority = match i % 3 {
            0 => Priority::High,
            1 => Priority::Normal,
            _ => Priority::Low,
        };
        s.engine
            .enqueue(&task(&format!("t{:02}", i), "A", priority, &s.clock))
            .await
            .unwrap();
    }

    // Churn: odd tasks fail once before completing, every fifth claim is
    // abandoned to the lease reaper.
    let mut failed_once = std::collections::HashSet::new();
    let mut claims = 0u32;
    loop {
        s.clock.advance_ms(s.config.retry.max_delay_ms() + 1);
        s.engine.promote_due("A").await.unwrap();
        s.engine.reap_expired_leases("A").await.unwrap();

        let Some(claimed) = s.engine.claim("A", "w1").await.unwrap() else {
            let depths = s.engine.depths("A").await.unwrap();
            if depths.pending + depths.delayed + depths.processing == 0 {
                break;
            }
            continue;
        };
        claims += 1;
        let id = claimed.id.as_str().to_string();

        if claims % 5 == 0 {
            // Abandon: let the lease expire instead of reporting
            s.clock.advance_ms(5_001);
            continue;
        }
        let digit: usize = id[1..].parse().unwrap();
        if digit % 2 == 1 && failed_once.insert(id.clone()) {
            s.engine.fail("A", &id, "w1", "boom", true).await.unwrap();
        } else {
            s.engine.complete("A", &id, "w1", None).await.unwrap();
        }
    }

    // Accounting: every task is terminal, none lost, none duplicated
    let depths = s.engine.depths("A").await.unwrap();
    assert_eq!(depths.pending, 0);
    assert_eq!(depths.delayed, 0);
    assert_eq!(depths.processing, 0);
    assert_eq!(depths.held, 0);

    let mut completed = 0u32;
    let mut dead = 0u32;
    for i in 0..N {
        let stored = s.engine.task("A", &format!("t{:02}", i)).await.unwrap();
        match stored.status {
            TaskStatus::Completed => completed += 1,
            TaskStatus::Dead => dead += 1,
            other => panic!("t{:02} ended non-terminal: {}", i, other),
        }
        assert!(stored.attempt <= stored.max_retries + 1);
    }
    assert_eq!(completed + dead, N as u32);
    assert_eq!(dead as u64, s.engine.depths("A").await.unwrap().dead);
}
