// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy surfaced across the fabric's API boundary.
//!
//! `Transient`, `Busy`, and `Paused` are recoverable locally (retry with
//! backoff). `Stale` and `Conflict` are recoverable by re-reading the
//! authoritative keys. `NotFound`, `Timeout`, and `Invariant` surface to the
//! caller; `Invariant` additionally indicates a bug and is logged at error
//! severity where it is raised.

use thiserror::Error;

/// Errors crossing the public API of every fabric component.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FabricError {
    /// State store temporarily unreachable; retry with backoff.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Lock, port, or agent id already held by someone else.
    #[error("busy: {0}")]
    Busy(String),

    /// Operation references an expired lease or lock.
    #[error("stale: {0}")]
    Stale(String),

    /// Lifecycle transition rejected; the caller no longer owns the task.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Claim attempted on a paused class or under emergency stop.
    #[error("paused: {0}")]
    Paused(String),

    /// Agent, task, or resource id unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request or acquire exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A scripted transaction detected a broken invariant.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl FabricError {
    /// True for errors a caller should retry after a short backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FabricError::Transient(_) | FabricError::Busy(_) | FabricError::Paused(_)
        )
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
