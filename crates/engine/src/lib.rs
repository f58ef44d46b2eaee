// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-engine: Priority queue engine for the Hive fabric.
//!
//! Per-class queues with age-boosted priority scoring, claim leases,
//! retry with exponential backoff, dead-lettering, pause/resume, and an
//! emergency stop. Every lifecycle transition is a scripted transaction,
//! so a task is always in exactly one of `pending`, `delayed`,
//! `processing`, `dead`, or terminal `completed`.

pub mod engine;
pub mod maintenance;
pub mod scripts;
pub mod stats;

pub use engine::{EnqueueDisposition, FailDisposition, QueueEngine};
pub use maintenance::{spawn_maintenance, MaintenanceHandle};
pub use stats::{QueueDepths, QueueStateInfo};
