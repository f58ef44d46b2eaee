// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types published on the fabric's pub/sub channels.
//!
//! Events are hints, not state: delivery is best-effort at-most-once, so
//! consumers react by re-reading the authoritative keys, never by
//! reconstructing state from the event stream.
//!
//! Serializes with `{"type": "event:name", ...fields}` format.

use crate::agent::AgentId;
use crate::approval::{RequestId, SnapshotId};
use crate::keys;
use crate::priority::Priority;
use crate::task::TaskId;
use serde::{Deserialize, Serialize};

/// Events emitted by the engine, registry, and gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- task --
    #[serde(rename = "task:enqueued")]
    TaskEnqueued {
        task_id: TaskId,
        class: String,
        priority: Priority,
    },

    #[serde(rename = "task:completed")]
    TaskCompleted {
        task_id: TaskId,
        class: String,
        agent_id: AgentId,
        /// Executor result, carried as a hint for observers
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },

    #[serde(rename = "task:dead")]
    TaskDead {
        task_id: TaskId,
        class: String,
        error: String,
        attempt: u32,
    },

    #[serde(rename = "task:reprioritized")]
    TaskReprioritized {
        task_id: TaskId,
        class: String,
        old_priority: Priority,
        new_priority: Priority,
        reason: String,
    },

    // -- queue --
    #[serde(rename = "queue:paused")]
    QueuePaused { class: String, reason: String },

    #[serde(rename = "queue:resumed")]
    QueueResumed { class: String },

    #[serde(rename = "queue:emergency_stop")]
    EmergencyStop { reason: String },

    #[serde(rename = "queue:emergency_cleared")]
    EmergencyCleared,

    // -- agent --
    #[serde(rename = "agent:registered")]
    AgentRegistered { agent_id: AgentId, class: String },

    #[serde(rename = "agent:deregistered")]
    AgentDeregistered {
        agent_id: AgentId,
        class: String,
        /// "deregister" for voluntary exits, "reaped" for liveness failures
        reason: String,
    },

    // -- consensus --
    #[serde(rename = "consensus:requested")]
    ConsensusRequested {
        request_id: RequestId,
        operation: String,
        initiator: AgentId,
        required_approvals: u32,
    },

    #[serde(rename = "consensus:granted")]
    ConsensusGranted {
        request_id: RequestId,
        snapshot_id: SnapshotId,
    },

    #[serde(rename = "consensus:denied")]
    ConsensusDenied {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "consensus:expired")]
    ConsensusExpired { request_id: RequestId },
}

impl Event {
    /// The pub/sub channel this event is published on.
    pub fn channel(&self) -> String {
        match self {
            Event::TaskEnqueued { class, .. } => keys::ch_task_enqueued(class),
            Event::TaskCompleted { .. } => keys::CH_TASK_COMPLETED.to_string(),
            Event::TaskDead { .. } => keys::CH_TASK_DEAD.to_string(),
            Event::TaskReprioritized { .. } => keys::CH_COORDINATION.to_string(),
            Event::QueuePaused { .. }
            | Event::QueueResumed { .. }
            | Event::EmergencyStop { .. }
            | Event::EmergencyCleared => keys::CH_COORDINATION.to_string(),
            Event::AgentRegistered { .. } => keys::CH_AGENT_REGISTERED.to_string(),
            Event::AgentDeregistered { .. } => keys::CH_AGENT_DEREGISTERED.to_string(),
            Event::ConsensusRequested { .. } => keys::CH_CONSENSUS_REQUESTED.to_string(),
            Event::ConsensusGranted { .. } => keys::CH_CONSENSUS_GRANTED.to_string(),
            Event::ConsensusDenied { .. } => keys::CH_CONSENSUS_DENIED.to_string(),
            Event::ConsensusExpired { .. } => keys::CH_CONSENSUS_EXPIRED.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
