// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State-store key layout and pub/sub channel names.
//!
//! Every component builds keys through these helpers; the layout is part of
//! the wire contract and interoperating implementations must produce the
//! same strings.

use crate::agent::AgentId;
use crate::approval::RequestId;
use crate::lock::ResourceKey;

// -- queue keyspace (per class) --

/// `tasks:{class}` - hash: task_id -> envelope JSON
pub fn tasks(class: &str) -> String {
    format!("tasks:{}", class)
}

/// `pending:{class}` - sorted set: task_id scored by effective priority
pub fn pending(class: &str) -> String {
    format!("pending:{}", class)
}

/// `delayed:{class}` - sorted set: task_id scored by ready-at epoch ms
pub fn delayed(class: &str) -> String {
    format!("delayed:{}", class)
}

/// `processing:{class}` - hash: task_id -> claim record JSON
pub fn processing(class: &str) -> String {
    format!("processing:{}", class)
}

/// `dead:{class}` - list: task_id
pub fn dead(class: &str) -> String {
    format!("dead:{}", class)
}

/// `held:{class}` - list: task_id parked while the class is paused
pub fn held(class: &str) -> String {
    format!("held:{}", class)
}

/// `queue_state:{class}` - hash: {paused, paused_at, reason}
pub fn queue_state(class: &str) -> String {
    format!("queue_state:{}", class)
}

// -- registry keyspace --

/// `agents:registry` - hash: agent_id -> descriptor JSON
pub const AGENTS_REGISTRY: &str = "agents:registry";

/// `agents:heartbeat` - hash: agent_id -> {last_heartbeat, load}
pub const AGENTS_HEARTBEAT: &str = "agents:heartbeat";

// -- lock keyspace --

/// `locks:file:{sha256(path)}` - hash: {writer?, readers, fence}
pub fn file_lock(resource: &ResourceKey) -> String {
    format!("locks:file:{}", resource.digest())
}

/// `locks:port:{port}` - string: holder agent id, with TTL
pub fn port_lock(port: u16) -> String {
    format!("locks:port:{}", port)
}

// -- consensus keyspace --

/// `consensus:req:{id}` - hash: request envelope + tallies
pub fn consensus_req(id: &RequestId) -> String {
    format!("consensus:req:{}", id)
}

/// Prefix for scanning active consensus requests.
pub const CONSENSUS_REQ_PREFIX: &str = "consensus:req:";

// -- global flags --

/// `emergency_stop` - string flag; presence halts all claims
pub const EMERGENCY_STOP: &str = "emergency_stop";

// -- pub/sub channels --

/// `task:enqueued:{class}` - claim hint for blocked claimers
pub fn ch_task_enqueued(class: &str) -> String {
    format!("task:enqueued:{}", class)
}

pub const CH_TASK_COMPLETED: &str = "task:completed";
pub const CH_TASK_DEAD: &str = "task:dead";
pub const CH_AGENT_REGISTERED: &str = "agent:registered";
pub const CH_AGENT_DEREGISTERED: &str = "agent:deregistered";

/// `agent:direct:{id}` - messages addressed to one agent
pub fn ch_direct(agent_id: &AgentId) -> String {
    format!("agent:direct:{}", agent_id)
}

pub const CH_BROADCAST: &str = "agent:broadcast";
pub const CH_COORDINATION: &str = "agent:coordination";

/// `agent:reply:{correlation_id}` - private reply topic for one request
pub fn ch_reply(correlation_id: &str) -> String {
    format!("agent:reply:{}", correlation_id)
}

pub const CH_CONSENSUS_REQUESTED: &str = "consensus:requested";
pub const CH_CONSENSUS_GRANTED: &str = "consensus:granted";
pub const CH_CONSENSUS_DENIED: &str = "consensus:denied";
pub const CH_CONSENSUS_EXPIRED: &str = "consensus:expired";

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
