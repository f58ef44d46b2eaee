// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-fabric: Inter-worker messaging.
//!
//! Three logical channels per worker (direct, broadcast, coordination)
//! over the store's pub/sub, with a handler dispatch table and
//! request/reply correlation. Delivery is at-most-once and best-effort;
//! handlers must be idempotent and messages are hints, never the system
//! of record.

pub mod fabric;

pub use fabric::{handler_fn, MessageHandler, MessagingFabric};
