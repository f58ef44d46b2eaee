// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent descriptor and registry state.
//!
//! An agent is one long-lived worker process. Its descriptor lives in the
//! `agents:registry` hash; the volatile heartbeat pair (`last_heartbeat`,
//! `load`) lives in `agents:heartbeat` so frequent refreshes do not rewrite
//! the descriptor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

crate::id_type! {
    /// Unique identifier for a registered worker process.
    pub struct AgentId;
}

/// Registry status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered but not yet claiming
    Initializing,
    /// Claiming and executing tasks
    Active,
    /// Temporarily not claiming (operator control)
    Paused,
    /// Finishing in-flight work before deregistration
    Draining,
    /// Reaped after missing heartbeats beyond the liveness TTL
    Dead,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Initializing => write!(f, "initializing"),
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Paused => write!(f, "paused"),
            AgentStatus::Draining => write!(f, "draining"),
            AgentStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Durable description of a worker, stored in `agents:registry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: AgentId,
    /// Class queue this agent claims from
    pub class: String,
    /// Capability strings advertised for `find_for_capability` routing
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub max_concurrency: u32,
    #[serde(default)]
    pub current_load: u32,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Epoch milliseconds at registration
    pub started_at_ms: u64,
    /// Epoch milliseconds of the most recent heartbeat
    pub last_heartbeat_ms: u64,
    /// Ports currently reserved through the coordinator
    #[serde(default)]
    pub reserved_ports: BTreeSet<u16>,
    /// Canonical resource keys of file locks currently held
    #[serde(default)]
    pub held_locks: BTreeSet<String>,
}

impl AgentDescriptor {
    pub fn new(agent_id: impl Into<AgentId>, class: impl Into<String>, now_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            class: class.into(),
            capabilities: BTreeSet::new(),
            max_concurrency: 1,
            current_load: 0,
            status: AgentStatus::Initializing,
            pid: None,
            started_at_ms: now_ms,
            last_heartbeat_ms: now_ms,
            reserved_ports: BTreeSet::new(),
            held_locks: BTreeSet::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// True while the last heartbeat is within the liveness TTL.
    pub fn is_live(&self, now_ms: u64, liveness_ttl_ms: u64) -> bool {
        self.status != AgentStatus::Dead
            && now_ms.saturating_sub(self.last_heartbeat_ms) <= liveness_ttl_ms
    }

    /// True if the agent can take on one more task.
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrency
    }

    pub fn advertises(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Load figures reported with each heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub current_load: u32,
    pub status: AgentStatus,
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
