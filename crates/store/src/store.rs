// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Store` trait: the primitive surface every component builds on.
//!
//! Single-key operations are individually atomic; anything spanning keys
//! must go through [`eval`](Store::eval) with a [`StoreScript`]. Pub/sub is
//! best-effort at-most-once with no replay - events are hints that trigger
//! reads of authoritative keys.

use crate::script::StoreScript;
use async_trait::async_trait;
use hive_core::FabricError;
use tokio::sync::mpsc;

/// Stream of `(channel, payload)` pairs from a pub/sub subscription.
///
/// Dropping the subscription unsubscribes; messages published while the
/// receiver is not being polled are buffered, messages published before
/// `subscribe` returned are lost.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<(String, String)>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<(String, String)>) -> Self {
        Self { rx }
    }

    /// Wait for the next message. Returns `None` when the backend closed
    /// the subscription.
    pub async fn recv(&mut self) -> Option<(String, String)> {
        self.rx.recv().await
    }

    /// Non-blocking poll for a buffered message.
    pub fn try_recv(&mut self) -> Option<(String, String)> {
        self.rx.try_recv().ok()
    }
}

/// Abstract access to a single-node key-value/pub-sub store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // -- strings / counters --

    async fn get(&self, key: &str) -> Result<Option<String>, FabricError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), FabricError>;

    /// Atomic compare-and-set: write only if absent, with an optional TTL.
    /// Returns true if the write happened.
    async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> Result<bool, FabricError>;

    /// Returns true if the key existed.
    async fn del(&self, key: &str) -> Result<bool, FabricError>;

    /// Atomic counter increment; missing keys start at zero.
    async fn incr(&self, key: &str) -> Result<i64, FabricError>;

    /// Set a TTL on an existing key. Returns false if the key is missing.
    async fn expire_ms(&self, key: &str, ttl_ms: u64) -> Result<bool, FabricError>;

    /// All keys starting with `prefix`. O(keyspace); used by periodic
    /// sweeps, not hot paths.
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, FabricError>;

    // -- hashes --

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, FabricError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), FabricError>;

    /// Returns true if the field existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, FabricError>;

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, FabricError>;

    async fn hlen(&self, key: &str) -> Result<u64, FabricError>;

    // -- sorted sets --

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), FabricError>;

    /// Returns true if the member existed.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, FabricError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, FabricError>;

    async fn zcard(&self, key: &str) -> Result<u64, FabricError>;

    /// Members with `min <= score <= max`, ascending, at most `limit`.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, FabricError>;

    /// Members by descending score over the index range `[start, stop]`
    /// (inclusive, like `ZREVRANGE`).
    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, FabricError>;

    // -- lists --

    /// Append; returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, FabricError>;

    async fn lpop(&self, key: &str) -> Result<Option<String>, FabricError>;

    /// Inclusive range, negative indices count from the tail (like
    /// `LRANGE`).
    async fn lrange(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<String>, FabricError>;

    async fn llen(&self, key: &str) -> Result<u64, FabricError>;

    /// Blocking head pop: waits up to `timeout_ms` for an element.
    async fn blpop(&self, key: &str, timeout_ms: u64) -> Result<Option<String>, FabricError>;

    // -- pub/sub --

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), FabricError>;

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, FabricError>;

    // -- scripted transactions --

    /// Run a multi-key atomic transaction. See [`StoreScript`] for the
    /// contract.
    async fn eval(
        &self,
        script: &StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, FabricError>;
}
