// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-gate: Consensus and backup gate for destructive operations.
//!
//! A worker proposing a destructive operation (file deletion, bulk
//! rename, schema change) must collect a quorum of approvals before
//! executing, and the gate snapshots the targets before the proposal is
//! even opened - so an approved record without a rollback point cannot
//! exist, no matter where a crash lands.

pub mod gate;
pub mod scripts;
pub mod snapshot;

pub use gate::ConsensusGate;
pub use snapshot::{SnapshotError, SnapshotStore};
