// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Readers-writer file locks with fence tokens.

use crate::scripts;
use hive_core::{keys, AgentId, Clock, FabricError, LockMode, ResourceKey, SystemClock};
use hive_store::Store;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll interval while waiting for a busy lock.
const ACQUIRE_RETRY_MS: u64 = 25;

/// A granted lock. Carry this to `release`; the fence token inside lets
/// downstream systems detect stale holders.
#[derive(Debug, Clone)]
pub struct FileLockHandle {
    pub resource: ResourceKey,
    pub mode: LockMode,
    pub holder: AgentId,
    pub fence: u64,
    pub expires_at_ms: u64,
}

/// Point-in-time view of a lock, expired holders excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockInspection {
    pub writer: Option<String>,
    pub reader_count: u64,
    pub fence: u64,
}

/// Issues and revokes distributed locks over files and ports.
pub struct ResourceCoordinator<C: Clock = SystemClock> {
    store: Arc<dyn Store>,
    clock: C,
}

impl<C: Clock> Clone for ResourceCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock> ResourceCoordinator<C> {
    pub fn new(store: Arc<dyn Store>, clock: C) -> Self {
        Self { store, clock }
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    pub(crate) async fn run_script(
        &self,
        script: &hive_store::StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, FabricError> {
        let raw = self
            .store
            .eval(script, keys, args)
            .await?
            .ok_or_else(|| FabricError::Invariant(format!("script {} returned nil", script.name)))?;
        serde_json::from_str(&raw)
            .map_err(|e| FabricError::Invariant(format!("script {} reply: {}", script.name, e)))
    }

    /// Acquire a read or write lock on `path`.
    ///
    /// `wait_ms > 0` retries a `Busy` result until the deadline. The
    /// returned handle expires after `ttl_ms` regardless of release.
    pub async fn acquire(
        &self,
        path: impl AsRef<Path>,
        mode: LockMode,
        agent: &AgentId,
        ttl_ms: u64,
        wait_ms: u64,
    ) -> Result<FileLockHandle, FabricError> {
        let resource = ResourceKey::file(path);
        let deadline = Instant::now() + Duration::from_millis(wait_ms);

        loop {
            let reply = self
                .run_script(
                    &scripts::ACQUIRE_FILE,
                    &[
                        keys::file_lock(&resource),
                        keys::AGENTS_REGISTRY.to_string(),
                    ],
                    &[
                        agent.as_str().to_string(),
                        mode.to_string(),
                        ttl_ms.to_string(),
                        self.now_ms().to_string(),
                        resource.digest().to_string(),
                    ],
                )
                .await?;

            match reply["outcome"].as_str() {
                Some("ok") => {
                    let handle = FileLockHandle {
                        resource: resource.clone(),
                        mode,
                        holder: agent.clone(),
                        fence: reply["fence"].as_u64().unwrap_or(0),
                        expires_at_ms: reply["expires_ms"].as_u64().unwrap_or(0),
                    };
                    debug!(resource = %handle.resource, %mode, agent = %agent, fence = handle.fence, "file lock acquired");
                    return Ok(handle);
                }
                Some("busy") => {
                    if Instant::now() + Duration::from_millis(ACQUIRE_RETRY_MS) >= deadline {
                        return Err(FabricError::Busy(format!(
                            "{} lock on {} held by {}",
                            mode,
                            resource,
                            reply["holder"].as_str().unwrap_or("unknown")
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(ACQUIRE_RETRY_MS)).await;
                }
                other => {
                    return Err(FabricError::Invariant(format!(
                        "unexpected acquire outcome: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Release a lock. Fence-checked: a handle whose TTL already expired
    /// (or whose lock was re-granted) gets `Stale`.
    pub async fn release(&self, handle: &FileLockHandle) -> Result<(), FabricError> {
        let reply = self
            .run_script(
                &scripts::RELEASE_FILE,
                &[
                    keys::file_lock(&handle.resource),
                    keys::AGENTS_REGISTRY.to_string(),
                ],
                &[
                    handle.holder.as_str().to_string(),
                    handle.mode.to_string(),
                    handle.fence.to_string(),
                    self.now_ms().to_string(),
                    handle.resource.digest().to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                debug!(resource = %handle.resource, agent = %handle.holder, "file lock released");
                Ok(())
            }
            Some("stale") => Err(FabricError::Stale(format!(
                "lock on {} with fence {} no longer held",
                handle.resource, handle.fence
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected release outcome: {:?}",
                other
            ))),
        }
    }

    /// Current holders and fence counter for `path`.
    pub async fn inspect(&self, path: impl AsRef<Path>) -> Result<LockInspection, FabricError> {
        let resource = ResourceKey::file(path);
        let now = self.now_ms();
        let fields = self.store.hgetall(&keys::file_lock(&resource)).await?;

        let mut inspection = LockInspection::default();
        let mut writer: Option<String> = None;
        let mut writer_expires = 0u64;
        for (field, value) in fields {
            match field.as_str() {
                "writer" => writer = Some(value),
                "writer_expires_ms" => writer_expires = value.parse().unwrap_or(0),
                "fence" => inspection.fence = value.parse().unwrap_or(0),
                "readers" => {
                    if let Ok(readers) = serde_json::from_str::<Value>(&value) {
                        if let Some(map) = readers.as_object() {
                            inspection.reader_count = map
                                .values()
                                .filter(|entry| {
                                    entry["expires_ms"].as_u64().map(|t| t > now).unwrap_or(false)
                                })
                                .count() as u64;
                        }
                    }
                }
                _ => {}
            }
        }
        if writer_expires > now {
            inspection.writer = writer;
        }
        Ok(inspection)
    }
}

#[cfg(test)]
#[path = "file_lock_tests.rs"]
mod tests;
