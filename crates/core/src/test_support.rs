// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::agent::AgentDescriptor;
use crate::clock::{Clock, FakeClock};
use crate::priority::Priority;
use crate::task::Task;

/// A normal-priority task with a short timeout and two retries.
pub fn task(id: &str, class: &str, clock: &FakeClock) -> Task {
    task_at(id, class, Priority::Normal, clock)
}

/// A task at an explicit priority band.
pub fn task_at(id: &str, class: &str, priority: Priority, clock: &FakeClock) -> Task {
    Task::builder(id, class)
        .priority(priority)
        .payload(serde_json::json!({"x": 1}))
        .timeout_ms(5_000)
        .max_retries(2)
        .build(clock)
}

/// An active agent descriptor with one capability.
pub fn agent(id: &str, class: &str, clock: &FakeClock) -> AgentDescriptor {
    AgentDescriptor::new(id, class, clock.epoch_ms())
        .with_capabilities(["generate"])
        .with_max_concurrency(2)
}
