// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hive_store::MemoryStore;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

async fn fabric(store: &Arc<MemoryStore>, id: &str) -> MessagingFabric {
    MessagingFabric::start(store.clone() as Arc<dyn Store>, AgentId::new(id))
        .await
        .unwrap()
}

fn collector() -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(message);
            None
        }
    });
    (handler, rx)
}

#[tokio::test]
async fn direct_message_reaches_recipient_handler() {
    let store = Arc::new(MemoryStore::new());
    let sender = fabric(&store, "w1").await;
    let receiver = fabric(&store, "w2").await;

    let (handler, mut rx) = collector();
    receiver.register_handler("status:report", handler);

    sender
        .send_direct(&AgentId::new("w2"), "status:report", json!({"load": 3}))
        .await
        .unwrap();

    let message = rx.recv().await.unwrap();
    assert_eq!(message.kind, "status:report");
    assert_eq!(message.sender, "w1");
    assert_eq!(message.payload["load"], 3);
}

#[tokio::test]
async fn self_directed_message_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let me = fabric(&store, "w1").await;

    let (handler, mut rx) = collector();
    me.register_handler("status:report", handler);

    me.send_direct(&AgentId::new("w1"), "status:report", json!({}))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_sender() {
    let store = Arc::new(MemoryStore::new());
    let sender = fabric(&store, "w1").await;
    let peer_a = fabric(&store, "w2").await;
    let peer_b = fabric(&store, "w3").await;

    let (sender_handler, mut sender_rx) = collector();
    sender.register_handler("fleet:notice", sender_handler);
    let (a_handler, mut a_rx) = collector();
    peer_a.register_handler("fleet:notice", a_handler);
    let (b_handler, mut b_rx) = collector();
    peer_b.register_handler("fleet:notice", b_handler);

    sender.broadcast("fleet:notice", json!({"n": 1})).await.unwrap();

    assert_eq!(a_rx.recv().await.unwrap().payload["n"], 1);
    assert_eq!(b_rx.recv().await.unwrap().payload["n"], 1);
    // The sender's own dispatch drops the echo
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(sender_rx.try_recv().is_err());
}

#[tokio::test]
async fn request_reply_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let requester = fabric(&store, "w1").await;
    let responder = fabric(&store, "w2").await;

    responder.register_handler(
        "math:double",
        handler_fn(|message: Message| async move {
            let n = message.payload["n"].as_i64().unwrap_or(0);
            Some(json!({"n": n * 2}))
        }),
    );

    let reply = requester
        .request(&AgentId::new("w2"), "math:double", json!({"n": 21}), 2_000)
        .await
        .unwrap();

    assert_eq!(reply.payload["n"], 42);
    assert_eq!(reply.kind, "math:double:reply");
    assert_eq!(reply.sender, "w2");
    assert!(reply.correlation_id.is_some());
}

#[tokio::test]
async fn request_times_out_without_responder() {
    let store = Arc::new(MemoryStore::new());
    let requester = fabric(&store, "w1").await;
    let _responder = fabric(&store, "w2").await; // attached, but no handler

    let result = requester
        .request(&AgentId::new("w2"), "math:double", json!({"n": 1}), 60)
        .await;
    assert!(matches!(result, Err(FabricError::Timeout(_))));
}

#[tokio::test]
async fn request_to_self_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let me = fabric(&store, "w1").await;
    let result = me
        .request(&AgentId::new("w1"), "math:double", json!({}), 100)
        .await;
    assert!(matches!(result, Err(FabricError::Invariant(_))));
}

#[tokio::test]
async fn duplicate_registration_replaces_handler() {
    let store = Arc::new(MemoryStore::new());
    let sender = fabric(&store, "w1").await;
    let receiver = fabric(&store, "w2").await;

    let first_hits = Arc::new(AtomicUsize::new(0));
    let second_hits = Arc::new(AtomicUsize::new(0));

    let hits = first_hits.clone();
    receiver.register_handler(
        "ping",
        handler_fn(move |_| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                None
            }
        }),
    );
    let hits = second_hits.clone();
    receiver.register_handler(
        "ping",
        handler_fn(move |_| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                None
            }
        }),
    );

    sender
        .send_direct(&AgentId::new("w2"), "ping", json!({}))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(first_hits.load(Ordering::SeqCst), 0);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_kind_dropped_unless_raw_fallback() {
    let store = Arc::new(MemoryStore::new());
    let sender = fabric(&store, "w1").await;
    let receiver = fabric(&store, "w2").await;

    sender
        .send_direct(&AgentId::new("w2"), "exotic:kind", json!({"first": true}))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // Opt in to raw delivery and resend
    let (raw, mut raw_rx) = collector();
    receiver.register_raw_handler(raw);
    sender
        .send_direct(&AgentId::new("w2"), "exotic:kind", json!({"first": false}))
        .await
        .unwrap();

    let message = raw_rx.recv().await.unwrap();
    assert_eq!(message.kind, "exotic:kind");
    assert_eq!(message.payload["first"], false);
    assert!(raw_rx.try_recv().is_err());
}

#[tokio::test]
async fn unregister_stops_delivery() {
    let store = Arc::new(MemoryStore::new());
    let sender = fabric(&store, "w1").await;
    let receiver = fabric(&store, "w2").await;

    let (handler, mut rx) = collector();
    receiver.register_handler("ping", handler);
    assert!(receiver.unregister_handler("ping"));
    assert!(!receiver.unregister_handler("ping"));

    sender
        .send_direct(&AgentId::new("w2"), "ping", json!({}))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn coordination_channel_fan_out() {
    let store = Arc::new(MemoryStore::new());
    let controller = fabric(&store, "ctl").await;
    let worker = fabric(&store, "w1").await;

    let (handler, mut rx) = collector();
    worker.register_handler(hive_core::message::control::SHUTDOWN, handler);

    controller
        .send_coordination(
            hive_core::message::control::SHUTDOWN,
            json!({"drain_ms": 500}),
        )
        .await
        .unwrap();

    let message = rx.recv().await.unwrap();
    assert_eq!(message.kind, "control:shutdown");
    assert_eq!(message.payload["drain_ms"], 500);
}
