// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted transactions.
//!
//! A [`StoreScript`] is a named atomic read-modify-write owned by the
//! subsystem whose invariant it encodes. It carries two implementations
//! that must stay semantically identical:
//!
//! - `lua`: executed server-side by [`RedisStore`](crate::RedisStore) via
//!   `EVALSHA`, giving Redis-native atomicity.
//! - `mem`: a native function run by [`MemoryStore`](crate::MemoryStore)
//!   under its single state mutex.
//!
//! Conventions shared by every script:
//! - all wall-clock inputs (now, deadlines) are passed in `args`, never
//!   read inside the script, so replays and both backends agree;
//! - the return value is `None` or a single JSON string (usually
//!   `{"outcome": ...}`), which the owning subsystem maps onto the
//!   [`FabricError`](hive_core::FabricError) taxonomy;
//! - publishes made inside a script become visible only after the
//!   transaction commits.

use crate::memory::MemState;
use hive_core::FabricError;

/// Native half of a scripted transaction.
pub type MemScriptFn =
    fn(&mut MemState, keys: &[String], args: &[String]) -> Result<Option<String>, FabricError>;

/// A named atomic multi-key transaction.
pub struct StoreScript {
    /// Stable name, used for logging and script caching
    pub name: &'static str,
    /// Lua source for the Redis backend
    pub lua: &'static str,
    /// Equivalent native implementation for the memory backend
    pub mem: MemScriptFn,
}

impl std::fmt::Debug for StoreScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreScript").field("name", &self.name).finish()
    }
}
