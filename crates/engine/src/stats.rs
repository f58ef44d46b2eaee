// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-facing queue queries: depths, pause state, per-priority
//! breakdown, and dead-letter contents.

use crate::engine::QueueEngine;
use hive_core::{keys, Clock, FabricError, Priority, Task};
use serde::Serialize;
use std::collections::BTreeMap;

/// Element counts per lifecycle bucket for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub pending: u64,
    pub delayed: u64,
    pub processing: u64,
    pub dead: u64,
    pub held: u64,
}

/// Pause state of one class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStateInfo {
    pub paused: bool,
    pub paused_at_ms: Option<u64>,
    pub reason: Option<String>,
}

impl<C: Clock> QueueEngine<C> {
    /// Bucket sizes for one class.
    pub async fn depths(&self, class: &str) -> Result<QueueDepths, FabricError> {
        let store = self.store();
        Ok(QueueDepths {
            pending: store.zcard(&keys::pending(class)).await?,
            delayed: store.zcard(&keys::delayed(class)).await?,
            processing: store.hlen(&keys::processing(class)).await?,
            dead: store.llen(&keys::dead(class)).await?,
            held: store.llen(&keys::held(class)).await?,
        })
    }

    /// Pause flag and reason for one class.
    pub async fn queue_state(&self, class: &str) -> Result<QueueStateInfo, FabricError> {
        let fields = self.store().hgetall(&keys::queue_state(class)).await?;
        let mut info = QueueStateInfo::default();
        for (field, value) in fields {
            match field.as_str() {
                "paused" => info.paused = value == "1",
                "paused_at" => info.paused_at_ms = value.parse().ok(),
                "reason" => info.reason = Some(value),
                _ => {}
            }
        }
        Ok(info)
    }

    /// Count of pending (claimable or delayed) tasks per priority band.
    pub async fn pending_breakdown(
        &self,
        class: &str,
    ) -> Result<BTreeMap<String, u64>, FabricError> {
        let envelopes = self.store().hgetall(&keys::tasks(class)).await?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for priority in Priority::all() {
            counts.insert(priority.to_string(), 0);
        }
        for (_, raw) in envelopes {
            let Ok(task) = serde_json::from_str::<Task>(&raw) else {
                continue;
            };
            if task.status == hive_core::TaskStatus::Pending {
                *counts.entry(task.priority.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Dead-lettered task ids for one class, oldest first.
    pub async fn dead_letter_ids(&self, class: &str) -> Result<Vec<String>, FabricError> {
        self.store().lrange(&keys::dead(class), 0, -1).await
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
