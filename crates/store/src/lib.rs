// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-store: State store adapter for the Hive fabric.
//!
//! A thin façade over a single-node key-value/pub-sub store. Two backends:
//! [`MemoryStore`] (tests and single-process embedding) and [`RedisStore`]
//! (production). Multi-key read-modify-writes go through [`StoreScript`]s -
//! Lua on Redis, a semantically identical native closure on the memory
//! backend - so every cross-key invariant is updated atomically on both.

pub mod memory;
pub mod redis_store;
pub mod script;
pub mod store;

pub use memory::{MemState, MemoryStore};
pub use redis_store::RedisStore;
pub use script::StoreScript;
pub use store::{Store, Subscription};
