// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The executor seam.
//!
//! The runtime treats task execution as opaque: the embedder supplies an
//! [`Executor`] and the runtime enforces the wall-clock timeout, reports
//! the outcome, and applies the retry policy. Executors may be fully
//! synchronous inside `process` or suspend at will.

use async_trait::async_trait;
use hive_core::Task;
use thiserror::Error;

/// Execution failure, split by whether a retry could help.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Transient failure; the engine schedules a retry if attempts remain
    #[error("retryable: {0}")]
    Retryable(String),
    /// Permanent failure; the task dead-letters immediately
    #[error("terminal: {0}")]
    Terminal(String),
}

impl ExecuteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecuteError::Retryable(_))
    }
}

/// Caller-supplied task processor.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Process one claimed task and return its result payload.
    async fn process(&self, task: &Task) -> Result<serde_json::Value, ExecuteError>;
}
