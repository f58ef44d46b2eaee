// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task envelope and lifecycle state machine.
//!
//! The serialized envelope is the single source of truth for a task and
//! lives in the `tasks:{class}` hash. Queue membership (`pending`,
//! `delayed`, `processing`, `dead`, `held`) determines where the task is in
//! its lifecycle; the `status` field mirrors that location.

use crate::clock::Clock;
use crate::priority::Priority;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

crate::id_type! {
    /// Unique identifier for a task.
    ///
    /// Opaque to the engine; producers may supply their own or use an
    /// [`IdMinter`](crate::IdMinter).
    pub struct TaskId;
}

/// Lifecycle status of a task. Exactly one holds at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued (or scheduled in `delayed`/`held`) and awaiting a claim
    Pending,
    /// Claimed by a worker under a lease
    Processing,
    /// Finished successfully
    Completed,
    /// Failed terminally without exhausting retries (operator intervention)
    Failed,
    /// Retries exhausted; parked in the dead-letter list
    Dead,
}

impl TaskStatus {
    /// True once the task can no longer transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Dead)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A unit of work routed to one worker class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Routing key naming the worker pool that handles this task
    pub class: String,
    pub priority: Priority,
    /// Opaque payload handed to the executor
    pub payload: serde_json::Value,
    /// Optional context appended to the payload prompt on execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_suffix: Option<String>,
    /// Wall-clock execution budget; also the claim lease length
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Number of claims so far; `attempt <= max_retries + 1`
    pub attempt: u32,
    #[serde(with = "iso_millis")]
    pub submitted_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(
        default,
        with = "iso_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub claim_deadline: Option<DateTime<Utc>>,
}

/// Fixed-width `YYYY-MM-DDTHH:MM:SS.mmmZ` timestamps.
///
/// Constant precision keeps the strings lexicographically ordered by time,
/// which claim tie-breaking relies on, and matches what the Lua scripts
/// emit.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

mod iso_millis_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => ser.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let text = Option::<String>::deserialize(de)?;
        match text {
            None => Ok(None),
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

impl Task {
    /// Start building a task for the given class.
    pub fn builder(id: impl Into<TaskId>, class: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(id, class)
    }

    /// Submission time as epoch milliseconds (score math).
    pub fn submitted_at_ms(&self) -> u64 {
        self.submitted_at.timestamp_millis().max(0) as u64
    }

    /// Claim deadline as epoch milliseconds, if claimed.
    pub fn claim_deadline_ms(&self) -> Option<u64> {
        self.claim_deadline
            .map(|t| t.timestamp_millis().max(0) as u64)
    }

    /// True while no further claims are allowed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True if a retryable failure at the current attempt count still has
    /// retries left.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_retries + 1
    }

    /// Mark the task claimed by `agent_id` with a lease ending at
    /// `deadline_ms`. Increments the attempt counter.
    pub fn begin_claim(&mut self, agent_id: &str, deadline_ms: u64) {
        self.attempt += 1;
        self.status = TaskStatus::Processing;
        self.claimed_by = Some(agent_id.to_string());
        self.claim_deadline = Some(epoch_ms_to_datetime(deadline_ms));
    }

    /// Clear claim fields on release (complete, fail, or requeue).
    pub fn clear_claim(&mut self, status: TaskStatus) {
        self.status = status;
        self.claimed_by = None;
        self.claim_deadline = None;
    }
}

/// Convert epoch milliseconds to a UTC timestamp.
pub fn epoch_ms_to_datetime(epoch_ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(epoch_ms as i64)
        .single()
        .unwrap_or_default()
}

/// Format epoch milliseconds as the fixed-precision wire timestamp.
pub fn format_epoch_ms(epoch_ms: u64) -> String {
    epoch_ms_to_datetime(epoch_ms).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a wire timestamp back to epoch milliseconds.
pub fn parse_epoch_ms(text: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

/// Builder for [`Task`] with sensible defaults.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    id: TaskId,
    class: String,
    priority: Priority,
    payload: serde_json::Value,
    prompt_suffix: Option<String>,
    timeout_ms: u64,
    max_retries: u32,
}

impl TaskBuilder {
    pub fn new(id: impl Into<TaskId>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            priority: Priority::Normal,
            payload: serde_json::Value::Null,
            prompt_suffix: None,
            timeout_ms: 60_000,
            max_retries: 3,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn prompt_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.prompt_suffix = Some(suffix.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Finish the envelope, stamping `submitted_at` from the clock.
    pub fn build(self, clock: &impl Clock) -> Task {
        Task {
            id: self.id,
            class: self.class,
            priority: self.priority,
            payload: self.payload,
            prompt_suffix: self.prompt_suffix,
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
            attempt: 0,
            submitted_at: epoch_ms_to_datetime(clock.epoch_ms()),
            status: TaskStatus::Pending,
            claimed_by: None,
            claim_deadline: None,
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
