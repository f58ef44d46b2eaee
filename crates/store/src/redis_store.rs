// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis store backend.
//!
//! Commands go through a [`ConnectionManager`] (auto-reconnecting,
//! cloneable); each subscription gets its own pub/sub connection pumped
//! into an mpsc channel by a spawned task. Scripted transactions run as
//! cached Lua scripts via `EVALSHA`. Every operation is bounded by the
//! configured op timeout and surfaces `FabricError::Transient` on network
//! failure, which callers retry.

use crate::script::StoreScript;
use crate::store::{Store, Subscription};
use async_trait::async_trait;
use futures_util::StreamExt;
use hive_core::FabricError;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Store backend talking to a single Redis node.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    op_timeout: Duration,
    scripts: Arc<Mutex<HashMap<&'static str, Arc<redis::Script>>>>,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str, op_timeout_ms: u64) -> Result<Self, FabricError> {
        let client = redis::Client::open(url)
            .map_err(|e| FabricError::Transient(format!("redis open: {}", e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| FabricError::Transient(format!("redis connect: {}", e)))?;
        Ok(Self {
            client,
            manager,
            op_timeout: Duration::from_millis(op_timeout_ms),
            scripts: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn run<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>> + Send,
    ) -> Result<T, FabricError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FabricError::Transient(e.to_string())),
            Err(_) => Err(FabricError::Transient("store operation timed out".to_string())),
        }
    }

    fn script_for(&self, script: &StoreScript) -> Arc<redis::Script> {
        let mut cache = self.scripts.lock();
        Arc::clone(
            cache
                .entry(script.name)
                .or_insert_with(|| Arc::new(redis::Script::new(script.lua))),
        )
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.get(&key).await }).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), FabricError> {
        let mut conn = self.manager.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.run(async move { conn.set(&key, &value).await }).await
    }

    async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> Result<bool, FabricError> {
        let mut conn = self.manager.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.run(async move {
            let reply: Option<String> = match ttl_ms {
                Some(ttl) => {
                    redis::cmd("SET")
                        .arg(&key)
                        .arg(&value)
                        .arg("NX")
                        .arg("PX")
                        .arg(ttl)
                        .query_async(&mut conn)
                        .await?
                }
                None => {
                    redis::cmd("SET")
                        .arg(&key)
                        .arg(&value)
                        .arg("NX")
                        .query_async(&mut conn)
                        .await?
                }
            };
            Ok(reply.is_some())
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        let removed: i64 = self.run(async move { conn.del(&key).await }).await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.incr(&key, 1i64).await }).await
    }

    async fn expire_ms(&self, key: &str, ttl_ms: u64) -> Result<bool, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.pexpire(&key, ttl_ms as i64).await })
            .await
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, FabricError> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", prefix);
        self.run(async move {
            let mut out = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await?;
                out.extend(batch);
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            out.sort();
            Ok(out)
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, FabricError> {
        let mut conn = self.manager.clone();
        let (key, field) = (key.to_string(), field.to_string());
        self.run(async move { conn.hget(&key, &field).await }).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), FabricError> {
        let mut conn = self.manager.clone();
        let (key, field, value) = (key.to_string(), field.to_string(), value.to_string());
        self.run(async move { conn.hset::<_, _, _, ()>(&key, &field, &value).await })
            .await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, FabricError> {
        let mut conn = self.manager.clone();
        let (key, field) = (key.to_string(), field.to_string());
        let removed: i64 = self
            .run(async move { conn.hdel(&key, &field).await })
            .await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        let map: HashMap<String, String> =
            self.run(async move { conn.hgetall(&key).await }).await?;
        let mut out: Vec<(String, String)> = map.into_iter().collect();
        out.sort();
        Ok(out)
    }

    async fn hlen(&self, key: &str) -> Result<u64, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.hlen(&key).await }).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), FabricError> {
        let mut conn = self.manager.clone();
        let (key, member) = (key.to_string(), member.to_string());
        self.run(async move { conn.zadd::<_, _, _, ()>(&key, &member, score).await })
            .await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, FabricError> {
        let mut conn = self.manager.clone();
        let (key, member) = (key.to_string(), member.to_string());
        let removed: i64 = self
            .run(async move { conn.zrem(&key, &member).await })
            .await?;
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, FabricError> {
        let mut conn = self.manager.clone();
        let (key, member) = (key.to_string(), member.to_string());
        self.run(async move { conn.zscore(&key, &member).await })
            .await
    }

    async fn zcard(&self, key: &str) -> Result<u64, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.zcard(&key).await }).await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move {
            conn.zrangebyscore_limit_withscores(&key, min, max, 0, limit as isize)
                .await
        })
        .await
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.zrevrange_withscores(&key, start, stop).await })
            .await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, FabricError> {
        let mut conn = self.manager.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.run(async move { conn.rpush(&key, &value).await }).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.lpop(&key, None).await }).await
    }

    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.lrange(&key, start as isize, stop as isize).await })
            .await
    }

    async fn llen(&self, key: &str) -> Result<u64, FabricError> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run(async move { conn.llen(&key).await }).await
    }

    async fn blpop(&self, key: &str, timeout_ms: u64) -> Result<Option<String>, FabricError> {
        // BLPOP holds the connection; use a dedicated one so the shared
        // manager is not blocked, and let the server own the timeout.
        let client = self.client.clone();
        let key = key.to_string();
        let timeout_secs = timeout_ms as f64 / 1000.0;
        let budget = Duration::from_millis(timeout_ms) + self.op_timeout;
        match tokio::time::timeout(budget, async move {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let reply: Option<(String, String)> = conn.blpop(&key, timeout_secs).await?;
            Ok::<_, redis::RedisError>(reply.map(|(_, value)| value))
        })
        .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FabricError::Transient(e.to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), FabricError> {
        let mut conn = self.manager.clone();
        let (channel, payload) = (channel.to_string(), payload.to_string());
        self.run(async move { conn.publish::<_, _, ()>(&channel, &payload).await })
            .await
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, FabricError> {
        let mut pubsub = tokio::time::timeout(self.op_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| FabricError::Transient("pubsub connect timed out".to_string()))?
            .map_err(|e| FabricError::Transient(e.to_string()))?;
        for channel in channels {
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| FabricError::Transient(e.to_string()))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, %channel, "dropping undecodable pubsub payload");
                        continue;
                    }
                };
                if tx.send((channel, payload)).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx))
    }

    async fn eval(
        &self,
        script: &StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, FabricError> {
        let cached = self.script_for(script);
        let mut conn = self.manager.clone();
        let keys = keys.to_vec();
        let args = args.to_vec();
        self.run(async move {
            let mut invocation = cached.prepare_invoke();
            for key in &keys {
                invocation.key(key.as_str());
            }
            for arg in &args {
                invocation.arg(arg.as_str());
            }
            invocation.invoke_async(&mut conn).await
        })
        .await
    }
}
