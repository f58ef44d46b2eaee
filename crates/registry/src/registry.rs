// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry operations.

use crate::scripts;
use hive_core::{
    keys, AgentDescriptor, AgentId, Clock, Event, FabricError, HiveConfig, LoadSnapshot,
    SystemClock,
};
use hive_store::Store;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters handed back to a freshly registered agent.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationReceipt {
    /// How often the agent must heartbeat
    pub heartbeat_period_ms: u64,
    /// Lease length granted on claimed tasks without their own timeout
    pub claim_lease_ms: u64,
}

/// Optional constraints for [`AgentRegistry::discover`].
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    pub class: Option<String>,
    pub capability: Option<String>,
}

/// Registry over the `agents:registry` / `agents:heartbeat` hashes.
pub struct AgentRegistry<C: Clock = SystemClock> {
    store: Arc<dyn Store>,
    clock: C,
    config: HiveConfig,
}

impl<C: Clock> Clone for AgentRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Clock> AgentRegistry<C> {
    pub fn new(store: Arc<dyn Store>, clock: C, config: HiveConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    fn registry_keys(&self) -> [String; 2] {
        [
            keys::AGENTS_REGISTRY.to_string(),
            keys::AGENTS_HEARTBEAT.to_string(),
        ]
    }

    async fn run_script(
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

    /// Add an agent to the registry.
    ///
    /// Fails with `Busy` while another live agent holds the same id; a
    /// dead or heartbeat-expired entry is overwritten.
    pub async fn register(
        &self,
        descriptor: &AgentDescriptor,
    ) -> Result<RegistrationReceipt, FabricError> {
        let descriptor_json = serde_json::to_string(descriptor)
            .map_err(|e| FabricError::Invariant(format!("serialize descriptor: {}", e)))?;
        let event = serde_json::to_string(&Event::AgentRegistered {
            agent_id: descriptor.agent_id.clone(),
            class: descriptor.class.clone(),
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;

        let reply = self
            .run_script(
                &scripts::REGISTER,
                &self.registry_keys(),
                &[
                    descriptor.agent_id.as_str().to_string(),
                    descriptor_json,
                    self.clock.epoch_ms().to_string(),
                    self.config.liveness_ttl_ms.to_string(),
                    keys::CH_AGENT_REGISTERED.to_string(),
                    event,
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                info!(agent_id = %descriptor.agent_id, class = %descriptor.class, "agent registered");
                Ok(RegistrationReceipt {
                    heartbeat_period_ms: self.config.heartbeat_period_ms,
                    claim_lease_ms: self.config.default_claim_lease_ms,
                })
            }
            Some("busy") => Err(FabricError::Busy(format!(
                "agent id {} already registered and live",
                descriptor.agent_id
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected register outcome: {:?}",
                other
            ))),
        }
    }

    /// Refresh liveness and load for an agent.
    pub async fn heartbeat(
        &self,
        agent_id: &AgentId,
        load: LoadSnapshot,
    ) -> Result<(), FabricError> {
        let reply = self
            .run_script(
                &scripts::HEARTBEAT,
                &self.registry_keys(),
                &[
                    agent_id.as_str().to_string(),
                    self.clock.epoch_ms().to_string(),
                    load.current_load.to_string(),
                    load.status.to_string(),
                ],
            )
            .await?;
        match reply["outcome"].as_str() {
            Some("ok") => Ok(()),
            Some("notfound") => Err(FabricError::NotFound(format!("agent {}", agent_id))),
            other => Err(FabricError::Invariant(format!(
                "unexpected heartbeat outcome: {:?}",
                other
            ))),
        }
    }

    /// Voluntarily remove an agent, releasing its locks and requeueing its
    /// claimed tasks.
    pub async fn deregister(&self, agent_id: &AgentId) -> Result<(), FabricError> {
        self.remove_and_cleanup(agent_id, "remove", "deregister")
            .await
    }

    /// Mark a heartbeat-expired agent dead and clean up after it.
    pub async fn reap_agent(&self, agent_id: &AgentId) -> Result<(), FabricError> {
        self.remove_and_cleanup(agent_id, "mark_dead", "reaped")
            .await
    }

    async fn remove_and_cleanup(
        &self,
        agent_id: &AgentId,
        mode: &str,
        reason: &str,
    ) -> Result<(), FabricError> {
        let reply = self
            .run_script(
                &scripts::REMOVE_AGENT,
                &self.registry_keys(),
                &[agent_id.as_str().to_string(), mode.to_string()],
            )
            .await?;
        let descriptor: AgentDescriptor = match reply["outcome"].as_str() {
            Some("ok") => serde_json::from_value(reply["descriptor"].clone())
                .map_err(|e| FabricError::Invariant(format!("descriptor: {}", e)))?,
            Some("notfound") => {
                return Err(FabricError::NotFound(format!("agent {}", agent_id)))
            }
            other => {
                return Err(FabricError::Invariant(format!(
                    "unexpected remove outcome: {:?}",
                    other
                )))
            }
        };

        self.release_agent_resources(&descriptor).await?;
        let requeued = self.requeue_agent_tasks(&descriptor).await?;

        let event = serde_json::to_string(&Event::AgentDeregistered {
            agent_id: agent_id.clone(),
            class: descriptor.class.clone(),
            reason: reason.to_string(),
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;
        self.store
            .publish(keys::CH_AGENT_DEREGISTERED, &event)
            .await?;

        info!(agent_id = %agent_id, reason, requeued, "agent removed from registry");
        Ok(())
    }

    async fn release_agent_resources(
        &self,
        descriptor: &AgentDescriptor,
    ) -> Result<(), FabricError> {
        for digest in &descriptor.held_locks {
            let key = format!("locks:file:{}", digest);
            self.run_script(
                &scripts::FORCE_RELEASE_FILE,
                &[key],
                &[descriptor.agent_id.as_str().to_string()],
            )
            .await?;
        }
        for port in &descriptor.reserved_ports {
            self.run_script(
                &scripts::FORCE_RELEASE_PORT,
                &[keys::port_lock(*port)],
                &[descriptor.agent_id.as_str().to_string()],
            )
            .await?;
        }
        Ok(())
    }

    async fn requeue_agent_tasks(
        &self,
        descriptor: &AgentDescriptor,
    ) -> Result<u64, FabricError> {
        let class = &descriptor.class;
        let reply = self
            .run_script(
                &scripts::REQUEUE_AGENT_TASKS,
                &[
                    keys::tasks(class),
                    keys::processing(class),
                    keys::pending(class),
                ],
                &[
                    descriptor.agent_id.as_str().to_string(),
                    self.clock.epoch_ms().to_string(),
                    keys::ch_task_enqueued(class),
                    class.to_string(),
                ],
            )
            .await?;
        Ok(reply["requeued"].as_u64().unwrap_or(0))
    }

    /// Fetch one agent's descriptor.
    pub async fn agent(&self, agent_id: &AgentId) -> Result<AgentDescriptor, FabricError> {
        let raw = self
            .store
            .hget(keys::AGENTS_REGISTRY, agent_id.as_str())
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("agent {}", agent_id)))?;
        serde_json::from_str(&raw)
            .map_err(|e| FabricError::Invariant(format!("descriptor: {}", e)))
    }

    /// List live agents matching the filter, lazily reaping any stale
    /// entries encountered in the scan.
    pub async fn discover(
        &self,
        filter: &DiscoverFilter,
    ) -> Result<Vec<AgentDescriptor>, FabricError> {
        let now = self.clock.epoch_ms();
        let entries = self.store.hgetall(keys::AGENTS_REGISTRY).await?;
        let mut live = Vec::new();

        for (agent_id, raw) in entries {
            let Ok(descriptor) = serde_json::from_str::<AgentDescriptor>(&raw) else {
                warn!(agent_id = %agent_id, "skipping undecodable registry entry");
                continue;
            };
            if descriptor.status == hive_core::AgentStatus::Dead {
                continue;
            }
            if !descriptor.is_live(now, self.config.liveness_ttl_ms) {
                debug!(agent_id = %agent_id, "lazy-reaping stale agent during discover");
                // Best effort: a failed reap surfaces on the next sweep
                let _ = self.reap_agent(&descriptor.agent_id).await;
                continue;
            }
            if let Some(class) = &filter.class {
                if &descriptor.class != class {
                    continue;
                }
            }
            if let Some(capability) = &filter.capability {
                if !descriptor.advertises(capability) {
                    continue;
                }
            }
            live.push(descriptor);
        }
        live.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(live)
    }

    /// Pick a live agent advertising `capability` with spare capacity,
    /// preferring the least recently active (oldest heartbeat) so load
    /// spreads across the fleet.
    pub async fn find_for_capability(
        &self,
        capability: &str,
    ) -> Result<Option<AgentDescriptor>, FabricError> {
        let filter = DiscoverFilter {
            class: None,
            capability: Some(capability.to_string()),
        };
        let mut candidates: Vec<AgentDescriptor> = self
            .discover(&filter)
            .await?
            .into_iter()
            .filter(|a| a.has_capacity())
            .collect();
        candidates.sort_by_key(|a| a.last_heartbeat_ms);
        Ok(candidates.into_iter().next())
    }

    /// Sweep the heartbeat hash and reap every agent whose heartbeat aged
    /// past the liveness TTL. Returns the reaped ids.
    pub async fn reap_dead(&self) -> Result<Vec<AgentId>, FabricError> {
        let now = self.clock.epoch_ms();
        let entries = self.store.hgetall(keys::AGENTS_HEARTBEAT).await?;
        let mut reaped = Vec::new();

        for (agent_id, raw) in entries {
            let last = serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| v["last_heartbeat_ms"].as_u64())
                .unwrap_or(0);
            if now.saturating_sub(last) > self.config.liveness_ttl_ms {
                let id = AgentId::new(agent_id);
                warn!(agent_id = %id, heartbeat_age_ms = now.saturating_sub(last), "reaping dead agent");
                match self.reap_agent(&id).await {
                    Ok(()) => reaped.push(id),
                    Err(FabricError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
