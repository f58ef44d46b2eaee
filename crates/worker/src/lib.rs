// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-worker: Long-lived worker runtime.
//!
//! Composes the registry, queue engine, and messaging fabric into a
//! process shell around a caller-supplied [`Executor`]. The runtime owns
//! the claim/execute/report loop, a dedicated heartbeat task that fires
//! regardless of executor progress, a bounded journal of recent task
//! outcomes, coordination message handlers, and graceful shutdown with
//! drain.

pub mod executor;
pub mod journal;
pub mod runtime;

pub use executor::{ExecuteError, Executor};
pub use journal::{Journal, JournalEntry, JournalOutcome};
pub use runtime::{Worker, WorkerConfig, WorkerHandle};
