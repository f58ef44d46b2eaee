// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message envelope for the inter-worker fabric.
//!
//! Delivery is best-effort at-most-once over the store's pub/sub; handlers
//! must be idempotent. The envelope `kind` string keys handler dispatch;
//! well-known control kinds are listed as constants so senders and handlers
//! cannot drift apart on spelling.

use crate::agent::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressing of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    /// One agent, delivered on `agent:direct:{id}`
    Agent(AgentId),
    /// Every agent of a class (each agent filters on its own class)
    Class(String),
    /// Every agent, delivered on `agent:broadcast`
    Broadcast,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Agent(id) => write!(f, "agent:{}", id),
            Recipient::Class(class) => write!(f, "class:{}", class),
            Recipient::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Fabric envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message type string keying handler dispatch
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: AgentId,
    pub recipient: Recipient,
    /// Correlates a reply with its request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Channel a reply should be published to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(
        kind: impl Into<String>,
        sender: AgentId,
        recipient: Recipient,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            sender,
            recipient,
            correlation_id: None,
            reply_to: None,
            payload,
        }
    }

    /// True when this message expects a reply.
    pub fn wants_reply(&self) -> bool {
        self.reply_to.is_some() && self.correlation_id.is_some()
    }
}

/// Well-known control message kinds on the coordination channel.
pub mod control {
    /// Ask an agent to begin a graceful shutdown.
    pub const SHUTDOWN: &str = "control:shutdown";
    /// Ask an agent to stop claiming without shutting down.
    pub const PAUSE: &str = "control:pause";
    /// Resume claiming after a pause.
    pub const RESUME: &str = "control:resume";
    /// Liveness probe; the handler replies with `PONG`.
    pub const PING: &str = "control:ping";
    /// Reply to [`PING`].
    pub const PONG: &str = "control:pong";
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
