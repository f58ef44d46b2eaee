// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded in-memory journal of recent task outcomes.
//!
//! Advisory only: the store remains the source of truth. The journal
//! exists so an operator (or a test) can ask a live worker what it has
//! been doing lately without a round trip to the store.

use hive_core::TaskId;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Outcome of one execution as the worker saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOutcome {
    Running,
    Completed,
    Failed(String),
    TimedOut,
    /// Worker shut down while the task was in flight
    Abandoned,
}

/// One executed (or executing) task.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub task_id: TaskId,
    pub class: String,
    pub attempt: u32,
    pub started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    pub outcome: JournalOutcome,
}

/// Fixed-capacity ring of journal entries, oldest evicted first.
pub struct Journal {
    entries: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
        }
    }

    /// Record the start of an execution.
    pub fn record_start(&self, task_id: TaskId, class: &str, attempt: u32, now_ms: u64) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(JournalEntry {
            task_id,
            class: class.to_string(),
            attempt,
            started_at_ms: now_ms,
            finished_at_ms: None,
            outcome: JournalOutcome::Running,
        });
    }

    /// Finalize the most recent entry for `task_id` that is still running.
    pub fn record_outcome(&self, task_id: &TaskId, outcome: JournalOutcome, now_ms: u64) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries
            .iter_mut()
            .rev()
            .find(|e| &e.task_id == task_id && e.outcome == JournalOutcome::Running)
        {
            entry.outcome = outcome;
            entry.finished_at_ms = Some(now_ms);
        }
    }

    /// Snapshot of entries, oldest first.
    pub fn recent(&self) -> Vec<JournalEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Count of entries still marked running.
    pub fn in_flight(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.outcome == JournalOutcome::Running)
            .count()
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
