// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store backend.
//!
//! One mutex guards the whole keyspace, which is what makes scripted
//! transactions trivially atomic here. Pub/sub fans out to per-subscriber
//! unbounded channels; publishes made inside a script are buffered and
//! delivered after the state lock is released, mirroring Redis where a
//! script's `PUBLISH` effects become visible at commit.

use crate::script::StoreScript;
use crate::store::{Store, Subscription};
use async_trait::async_trait;
use hive_core::{Clock, FabricError, SystemClock};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

/// The whole keyspace, guarded by one mutex.
///
/// Script closures receive `&mut MemState` and compose these primitives;
/// each method mirrors the semantics of the matching Redis command.
#[derive(Default)]
pub struct MemState {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<String>>,
    /// Publishes buffered during a script, delivered at commit
    publishes: Vec<(String, String)>,
    /// Wall clock for TTL expiry, refreshed before every operation
    now_ms: u64,
}

struct StringEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl MemState {
    fn live_string(&mut self, key: &str) -> bool {
        if let Some(entry) = self.strings.get(key) {
            if let Some(expires) = entry.expires_at_ms {
                if expires <= self.now_ms {
                    self.strings.remove(key);
                    return false;
                }
            }
            true
        } else {
            false
        }
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        if !self.live_string(key) {
            return None;
        }
        self.strings.get(key).map(|e| e.value.clone())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at_ms: None,
            },
        );
    }

    pub fn set_nx_px(&mut self, key: &str, value: &str, ttl_ms: Option<u64>) -> bool {
        if self.live_string(key) {
            return false;
        }
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at_ms: ttl_ms.map(|t| self.now_ms + t),
            },
        );
        true
    }

    pub fn del(&mut self, key: &str) -> bool {
        let existed = self.live_string(key);
        self.strings.remove(key);
        let had_hash = self.hashes.remove(key).is_some();
        let had_zset = self.zsets.remove(key).is_some();
        let had_list = self.lists.remove(key).is_some();
        existed || had_hash || had_zset || had_list
    }

    pub fn incr(&mut self, key: &str) -> Result<i64, FabricError> {
        let current = match self.get(key) {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| FabricError::Invariant(format!("INCR on non-integer key {}", key)))?,
            None => 0,
        };
        let next = current + 1;
        let expires = self.strings.get(key).and_then(|e| e.expires_at_ms);
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: next.to_string(),
                expires_at_ms: expires,
            },
        );
        Ok(next)
    }

    pub fn expire_ms(&mut self, key: &str, ttl_ms: u64) -> bool {
        if !self.live_string(key) {
            return false;
        }
        let deadline = self.now_ms + ttl_ms;
        if let Some(entry) = self.strings.get_mut(key) {
            entry.expires_at_ms = Some(deadline);
            true
        } else {
            false
        }
    }

    pub fn scan_keys(&mut self, prefix: &str) -> Vec<String> {
        let now = self.now_ms;
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .filter(|(k, e)| {
                k.starts_with(prefix) && e.expires_at_ms.map(|t| t > now).unwrap_or(true)
            })
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(self.hashes.keys().filter(|k| k.starts_with(prefix)).cloned());
        keys.extend(self.zsets.keys().filter(|k| k.starts_with(prefix)).cloned());
        keys.extend(self.lists.keys().filter(|k| k.starts_with(prefix)).cloned());
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.hashes.get(key).and_then(|h| h.get(field).cloned())
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<i64, FabricError> {
        let current = match self.hget(key, field) {
            Some(v) => v.parse::<i64>().map_err(|_| {
                FabricError::Invariant(format!("HINCRBY on non-integer field {}.{}", key, field))
            })?,
            None => 0,
        };
        let next = current + delta;
        self.hset(key, field, &next.to_string());
        Ok(next)
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> bool {
        let removed = self
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false);
        if self.hashes.get(key).map(|h| h.is_empty()).unwrap_or(false) {
            self.hashes.remove(key);
        }
        removed
    }

    pub fn hgetall(&self, key: &str) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn hlen(&self, key: &str) -> u64 {
        self.hashes.get(key).map(|h| h.len() as u64).unwrap_or(0)
    }

    pub fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> bool {
        let removed = self
            .zsets
            .get_mut(key)
            .map(|z| z.remove(member).is_some())
            .unwrap_or(false);
        if self.zsets.get(key).map(|z| z.is_empty()).unwrap_or(false) {
            self.zsets.remove(key);
        }
        removed
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.zsets.get(key).and_then(|z| z.get(member).copied())
    }

    pub fn zcard(&self, key: &str) -> u64 {
        self.zsets.get(key).map(|z| z.len() as u64).unwrap_or(0)
    }

    pub fn zrange_by_score(&self, key: &str, min: f64, max: f64, limit: usize) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .zsets
            .get(key)
            .map(|z| {
                z.iter()
                    .filter(|(_, s)| **s >= min && **s <= max)
                    .map(|(m, s)| (m.clone(), *s))
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        members.truncate(limit);
        members
    }

    pub fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        // ZREVRANGE order: score desc, member reverse-lex on ties
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        });
        slice_range(&members, start, stop)
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> u64 {
        let list = self.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        list.len() as u64
    }

    pub fn lpop(&mut self, key: &str) -> Option<String> {
        let out = self.lists.get_mut(key).and_then(|l| l.pop_front());
        if self.lists.get(key).map(|l| l.is_empty()).unwrap_or(false) {
            self.lists.remove(key);
        }
        out
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let list: Vec<String> = self
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default();
        slice_range_i64(&list, start, stop)
    }

    pub fn llen(&self, key: &str) -> u64 {
        self.lists.get(key).map(|l| l.len() as u64).unwrap_or(0)
    }

    /// Buffer a publish for delivery at commit.
    pub fn publish(&mut self, channel: &str, payload: &str) {
        self.publishes.push((channel.to_string(), payload.to_string()));
    }

    /// The wall-clock instant the current operation runs at.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }
}

fn slice_range(items: &[(String, f64)], start: isize, stop: isize) -> Vec<(String, f64)> {
    let len = items.len() as isize;
    let norm = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len) };
    let from = norm(start);
    let to = (norm(stop) + 1).min(len);
    if from >= to {
        return Vec::new();
    }
    items[from as usize..to as usize].to_vec()
}

fn slice_range_i64(items: &[String], start: i64, stop: i64) -> Vec<String> {
    let len = items.len() as i64;
    let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
    let from = norm(start);
    let to = (norm(stop) + 1).min(len);
    if from >= to {
        return Vec::new();
    }
    items[from as usize..to as usize].to_vec()
}

struct SubEntry {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<(String, String)>,
}

struct Inner {
    state: Mutex<MemState>,
    subs: Mutex<Vec<SubEntry>>,
    list_notify: Notify,
}

/// Single-process store backend with real pub/sub and TTL semantics.
pub struct MemoryStore<C: Clock = SystemClock> {
    inner: Arc<Inner>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Clone for MemoryStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock> MemoryStore<C> {
    /// Store driven by an explicit clock (tests use [`FakeClock`]).
    ///
    /// [`FakeClock`]: hive_core::FakeClock
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MemState::default()),
                subs: Mutex::new(Vec::new()),
                list_notify: Notify::new(),
            }),
            clock,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemState) -> T) -> T {
        let mut state = self.inner.state.lock();
        state.now_ms = self.clock.epoch_ms();
        let out = f(&mut state);
        let publishes = std::mem::take(&mut state.publishes);
        drop(state);
        for (channel, payload) in publishes {
            self.deliver(&channel, &payload);
        }
        out
    }

    fn deliver(&self, channel: &str, payload: &str) {
        let mut subs = self.inner.subs.lock();
        subs.retain(|entry| {
            if entry.channels.contains(channel) {
                entry.tx.send((channel.to_string(), payload.to_string())).is_ok()
            } else {
                !entry.tx.is_closed()
            }
        });
    }
}

#[async_trait]
impl<C: Clock> Store for MemoryStore<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, FabricError> {
        Ok(self.with_state(|s| s.get(key)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), FabricError> {
        self.with_state(|s| s.set(key, value));
        Ok(())
    }

    async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> Result<bool, FabricError> {
        Ok(self.with_state(|s| s.set_nx_px(key, value, ttl_ms)))
    }

    async fn del(&self, key: &str) -> Result<bool, FabricError> {
        Ok(self.with_state(|s| s.del(key)))
    }

    async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        self.with_state(|s| s.incr(key))
    }

    async fn expire_ms(&self, key: &str, ttl_ms: u64) -> Result<bool, FabricError> {
        Ok(self.with_state(|s| s.expire_ms(key, ttl_ms)))
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, FabricError> {
        Ok(self.with_state(|s| s.scan_keys(prefix)))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, FabricError> {
        Ok(self.with_state(|s| s.hget(key, field)))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), FabricError> {
        self.with_state(|s| s.hset(key, field, value));
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, FabricError> {
        Ok(self.with_state(|s| s.hdel(key, field)))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, FabricError> {
        Ok(self.with_state(|s| s.hgetall(key)))
    }

    async fn hlen(&self, key: &str) -> Result<u64, FabricError> {
        Ok(self.with_state(|s| s.hlen(key)))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), FabricError> {
        self.with_state(|s| s.zadd(key, member, score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, FabricError> {
        Ok(self.with_state(|s| s.zrem(key, member)))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, FabricError> {
        Ok(self.with_state(|s| s.zscore(key, member)))
    }

    async fn zcard(&self, key: &str) -> Result<u64, FabricError> {
        Ok(self.with_state(|s| s.zcard(key)))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, FabricError> {
        Ok(self.with_state(|s| s.zrange_by_score(key, min, max, limit)))
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, FabricError> {
        Ok(self.with_state(|s| s.zrevrange(key, start, stop)))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, FabricError> {
        let len = self.with_state(|s| s.rpush(key, value));
        self.inner.list_notify.notify_waiters();
        Ok(len)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, FabricError> {
        Ok(self.with_state(|s| s.lpop(key)))
    }

    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, FabricError> {
        Ok(self.with_state(|s| s.lrange(key, start, stop)))
    }

    async fn llen(&self, key: &str) -> Result<u64, FabricError> {
        Ok(self.with_state(|s| s.llen(key)))
    }

    async fn blpop(&self, key: &str, timeout_ms: u64) -> Result<Option<String>, FabricError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            // Register interest before checking, so a push between the
            // check and the await still wakes us.
            let notified = self.inner.list_notify.notified();
            if let Some(value) = self.with_state(|s| s.lpop(key)) {
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), FabricError> {
        self.deliver(channel, payload);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, FabricError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.inner.subs.lock();
        subs.retain(|entry| !entry.tx.is_closed());
        subs.push(SubEntry {
            channels: channels.iter().cloned().collect(),
            tx,
        });
        Ok(Subscription::new(rx))
    }

    async fn eval(
        &self,
        script: &StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, FabricError> {
        self.with_state(|s| (script.mem)(s, keys, args))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
