//! Operator control surface: pause/resume, emergency stop, dead-letter
//! requeue, queue statistics, and registry discovery.

use crate::prelude::*;
use hive_core::{AgentDescriptor, Clock, FabricError, Priority};
use hive_registry::DiscoverFilter;

#[tokio::test]
async fn pause_holds_resume_drains() {
    let s = stack();

    s.engine.pause("A", "deploy window").await.unwrap();
    s.engine
        .enqueue(&task("t1", "A", Priority::Normal, &s.clock))
        .await
        .unwrap();
    s.clock.advance_ms(5);
    s.engine
        .enqueue(&task("t2", "A", Priority::Normal, &s.clock))
        .await
        .unwrap();

    let state = s.engine.queue_state("A").await.unwrap();
    assert!(state.paused);
    assert_eq!(state.reason.as_deref(), Some("deploy window"));
    assert_eq!(s.engine.depths("A").await.unwrap().held, 2);
    assert!(matches!(
        s.engine.claim("A", "w1").await,
        Err(FabricError::Paused(_))
    ));

    assert_eq!(s.engine.resume("A").await.unwrap(), 2);

    // Held order preserved on drain
    assert_eq!(s.engine.claim("A", "w1").await.unwrap().unwrap().id, "t1");
    assert_eq!(s.engine.claim("A", "w1").await.unwrap().unwrap().id, "t2");
}

#[tokio::test]
async fn emergency_stop_halts_every_class() {
    let s = stack();
    s.engine
        .enqueue(&task("a1", "A", Priority::Normal, &s.clock))
        .await
        .unwrap();
    s.engine
        .enqueue(&task("b1", "B", Priority::Normal, &s.clock))
        .await
        .unwrap();

    s.engine.emergency_stop("incident").await.unwrap();
    for class in ["A", "B"] {
        assert!(matches!(
            s.engine.claim(class, "w1").await,
            Err(FabricError::Paused(_))
        ));
    }

    // Reversible only by the explicit resume call
    s.engine.clear_emergency_stop().await.unwrap();
    assert!(s.engine.claim("A", "w1").await.unwrap().is_some());
    assert!(s.engine.claim("B", "w1").await.unwrap().is_some());
}

#[tokio::test]
async fn dead_letters_can_be_requeued() {
    let s = stack();
    let t = hive_core::Task::builder("t1", "A")
        .max_retries(0)
        .timeout_ms(5_000)
        .build(&s.clock);
    s.engine.enqueue(&t).await.unwrap();
    s.engine.claim("A", "w1").await.unwrap().unwrap();
    s.engine.fail("A", "t1", "w1", "boom", true).await.unwrap();

    assert_eq!(s.engine.dead_letter_ids("A").await.unwrap(), vec!["t1"]);
    assert_eq!(s.engine.requeue_failed("A").await.unwrap(), 1);

    let reclaimed = s.engine.claim("A", "w1").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, "t1");
    // Fresh attempt budget after operator requeue
    assert_eq!(reclaimed.attempt, 1);
}

#[tokio::test]
async fn queue_depths_and_breakdown_surface() {
    let s = stack();
    for (id, priority) in [
        ("c1", Priority::Critical),
        ("n1", Priority::Normal),
        ("n2", Priority::Normal),
        ("d1", Priority::Deferred),
    ] {
        s.engine
            .enqueue(&task(id, "A", priority, &s.clock))
            .await
            .unwrap();
    }
    s.engine.claim("A", "w1").await.unwrap().unwrap();

    let depths = s.engine.depths("A").await.unwrap();
    assert_eq!(depths.pending, 3);
    assert_eq!(depths.processing, 1);

    let breakdown = s.engine.pending_breakdown("A").await.unwrap();
    assert_eq!(breakdown["critical"], 0); // claimed first
    assert_eq!(breakdown["normal"], 2);
    assert_eq!(breakdown["deferred"], 1);
}

#[tokio::test]
async fn registry_discovery_surface() {
    let s = stack();
    s.registry
        .register(
            &AgentDescriptor::new("w1", "A", s.clock.epoch_ms())
                .with_capabilities(["generate"]),
        )
        .await
        .unwrap();
    s.registry
        .register(
            &AgentDescriptor::new("w2", "B", s.clock.epoch_ms())
                .with_capabilities(["scrape"]),
        )
        .await
        .unwrap();

    let all = s.registry.discover(&DiscoverFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let scrapers = s
        .registry
        .find_for_capability("scrape")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scrapers.agent_id, "w2");
}
