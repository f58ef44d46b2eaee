// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consensus gate operations.

use crate::scripts;
use crate::snapshot::{SnapshotError, SnapshotStore};
use hive_core::{
    keys, AgentId, ApprovalRequest, ApprovalStatus, Clock, Event, FabricError, IdMinter,
    RequestId, SnapshotId, SystemClock, UuidMinter,
};
use hive_store::Store;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Approval protocol plus pre-destruction snapshots.
pub struct ConsensusGate<C: Clock = SystemClock, I: IdMinter = UuidMinter> {
    store: Arc<dyn Store>,
    clock: C,
    minter: I,
    snapshots: SnapshotStore,
}

impl<C: Clock> ConsensusGate<C, UuidMinter> {
    pub fn new(store: Arc<dyn Store>, clock: C, snapshots: SnapshotStore) -> Self {
        Self::with_minter(store, clock, UuidMinter, snapshots)
    }
}

impl<C: Clock, I: IdMinter> ConsensusGate<C, I> {
    pub fn with_minter(
        store: Arc<dyn Store>,
        clock: C,
        minter: I,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            store,
            clock,
            minter,
            snapshots,
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn run_script(
        &self,
        script: &hive_store::StoreScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, FabricError> {
        let raw = self
            .store
            .eval(script, keys, args)
            .await?
            .ok_or_else(|| FabricError::Invariant(format!("script {} returned nil", script.name)))?;
        serde_json::from_str(&raw)
            .map_err(|e| FabricError::Invariant(format!("script {} reply: {}", script.name, e)))
    }

    /// Open an approval request for a destructive operation.
    ///
    /// The snapshot is taken synchronously before the record exists; if it
    /// fails, the proposal is rejected and no request is opened.
    pub async fn propose(
        &self,
        initiator: &AgentId,
        operation: &str,
        targets: Vec<PathBuf>,
        reason: &str,
        required_approvals: u32,
        deadline_in_ms: u64,
    ) -> Result<ApprovalRequest, FabricError> {
        let now = self.clock.epoch_ms();
        let request_id = RequestId::new(self.minter.mint());
        let snapshot_id = SnapshotId::new(self.minter.mint());

        self.snapshots
            .create(&snapshot_id, &targets, now)
            .map_err(|e| match e {
                SnapshotError::MissingTarget(path) => {
                    FabricError::NotFound(format!("snapshot target {}", path.display()))
                }
                other => FabricError::Transient(format!("snapshot failed: {}", other)),
            })?;

        let request = ApprovalRequest {
            request_id: request_id.clone(),
            operation: operation.to_string(),
            targets,
            reason: reason.to_string(),
            initiator: initiator.clone(),
            required_approvals,
            deadline_ms: now + deadline_in_ms,
            approvals: BTreeSet::new(),
            rejections: BTreeSet::new(),
            status: ApprovalStatus::Pending,
            snapshot_id: Some(snapshot_id),
            rejection_reason: None,
        };

        let data = serde_json::to_string(&request)
            .map_err(|e| FabricError::Invariant(format!("serialize request: {}", e)))?;
        let event = serde_json::to_string(&Event::ConsensusRequested {
            request_id: request_id.clone(),
            operation: operation.to_string(),
            initiator: initiator.clone(),
            required_approvals,
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;

        let reply = self
            .run_script(
                &scripts::CREATE_REQ,
                &[keys::consensus_req(&request_id)],
                &[data, keys::CH_CONSENSUS_REQUESTED.to_string(), event],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                info!(request_id = %request_id, operation, initiator = %initiator, "consensus requested");
                Ok(request)
            }
            Some("conflict") => Err(FabricError::Conflict(format!(
                "request {} already exists",
                request_id
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected propose outcome: {:?}",
                other
            ))),
        }
    }

    /// Record an approval vote. Idempotent per reviewer.
    pub async fn approve(
        &self,
        request_id: &RequestId,
        reviewer: &AgentId,
    ) -> Result<ApprovalStatus, FabricError> {
        self.vote(request_id, reviewer, true, "").await
    }

    /// Record a rejection. Any single rejection settles the request.
    pub async fn reject(
        &self,
        request_id: &RequestId,
        reviewer: &AgentId,
        reason: &str,
    ) -> Result<ApprovalStatus, FabricError> {
        self.vote(request_id, reviewer, false, reason).await
    }

    async fn vote(
        &self,
        request_id: &RequestId,
        reviewer: &AgentId,
        approve: bool,
        reason: &str,
    ) -> Result<ApprovalStatus, FabricError> {
        let reply = self
            .run_script(
                &scripts::VOTE,
                &[keys::consensus_req(request_id)],
                &[
                    reviewer.as_str().to_string(),
                    if approve { "1" } else { "0" }.to_string(),
                    reason.to_string(),
                    self.clock.epoch_ms().to_string(),
                    keys::CH_CONSENSUS_GRANTED.to_string(),
                    keys::CH_CONSENSUS_DENIED.to_string(),
                    keys::CH_CONSENSUS_EXPIRED.to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                let status = parse_status(reply["status"].as_str())?;
                info!(request_id = %request_id, reviewer = %reviewer, approve, %status, "vote recorded");
                Ok(status)
            }
            Some("settled") => parse_status(reply["status"].as_str()),
            Some("expired") => Ok(ApprovalStatus::Expired),
            Some("conflict") => Err(FabricError::Conflict(
                "initiator cannot vote on its own request".to_string(),
            )),
            Some("notfound") => Err(FabricError::NotFound(format!("request {}", request_id))),
            other => Err(FabricError::Invariant(format!(
                "unexpected vote outcome: {:?}",
                other
            ))),
        }
    }

    /// Current authoritative request record.
    pub async fn status(&self, request_id: &RequestId) -> Result<ApprovalRequest, FabricError> {
        let raw = self
            .store
            .hget(&keys::consensus_req(request_id), "data")
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("request {}", request_id)))?;
        serde_json::from_str(&raw)
            .map_err(|e| FabricError::Invariant(format!("approval request: {}", e)))
    }

    /// Gate check before executing the destructive act: the request must
    /// be `approved` AND its snapshot must exist on disk. Returns the
    /// snapshot id to reference for rollback.
    pub async fn authorize(&self, request_id: &RequestId) -> Result<SnapshotId, FabricError> {
        let request = self.status(request_id).await?;
        if request.status != ApprovalStatus::Approved {
            return Err(FabricError::Conflict(format!(
                "request {} is {}, not approved",
                request_id, request.status
            )));
        }
        let snapshot_id = request.snapshot_id.ok_or_else(|| {
            FabricError::Invariant(format!("approved request {} without snapshot", request_id))
        })?;
        if !self.snapshots.exists(&snapshot_id) {
            return Err(FabricError::Invariant(format!(
                "approved request {} references missing snapshot {}",
                request_id, snapshot_id
            )));
        }
        Ok(snapshot_id)
    }

    /// Wait until the request settles or `timeout_ms` elapses.
    ///
    /// Subscribes to the consensus channels as a hint source but always
    /// re-reads the authoritative record before deciding.
    pub async fn wait_for_decision(
        &self,
        request_id: &RequestId,
        timeout_ms: u64,
    ) -> Result<ApprovalStatus, FabricError> {
        let channels = [
            keys::CH_CONSENSUS_GRANTED.to_string(),
            keys::CH_CONSENSUS_DENIED.to_string(),
            keys::CH_CONSENSUS_EXPIRED.to_string(),
        ];
        let mut sub = self.store.subscribe(&channels).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let request = self.status(request_id).await?;
            if request.status.is_settled() {
                return Ok(request.status);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(FabricError::Timeout(format!(
                    "request {} undecided after {}ms",
                    request_id, timeout_ms
                )));
            }
            match tokio::time::timeout(remaining, sub.recv()).await {
                Ok(Some(_hint)) => continue,
                Ok(None) => {
                    sub = self.store.subscribe(&channels).await?;
                }
                Err(_) => {
                    return Err(FabricError::Timeout(format!(
                        "request {} undecided after {}ms",
                        request_id, timeout_ms
                    )))
                }
            }
        }
    }

    /// Expire every overdue pending request. Returns the expired ids.
    pub async fn expire_overdue(&self) -> Result<Vec<RequestId>, FabricError> {
        let now = self.clock.epoch_ms();
        let req_keys = self.store.scan_keys(keys::CONSENSUS_REQ_PREFIX).await?;
        let mut expired = Vec::new();

        for key in req_keys {
            let Some(id) = key.strip_prefix(keys::CONSENSUS_REQ_PREFIX) else {
                continue;
            };
            let reply = self
                .run_script(
                    &scripts::EXPIRE_REQ,
                    &[key.clone()],
                    &[now.to_string(), keys::CH_CONSENSUS_EXPIRED.to_string()],
                )
                .await?;
            if reply["outcome"].as_str() == Some("expired") {
                warn!(request_id = id, "consensus request expired");
                expired.push(RequestId::new(id));
            }
        }
        Ok(expired)
    }

    /// All requests still awaiting a decision.
    pub async fn active_requests(&self) -> Result<Vec<ApprovalRequest>, FabricError> {
        let req_keys = self.store.scan_keys(keys::CONSENSUS_REQ_PREFIX).await?;
        let mut active = Vec::new();
        for key in req_keys {
            let Some(raw) = self.store.hget(&key, "data").await? else {
                continue;
            };
            let Ok(request) = serde_json::from_str::<ApprovalRequest>(&raw) else {
                continue;
            };
            if request.status == ApprovalStatus::Pending {
                active.push(request);
            }
        }
        active.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        Ok(active)
    }
}

fn parse_status(raw: Option<&str>) -> Result<ApprovalStatus, FabricError> {
    match raw {
        Some("pending") => Ok(ApprovalStatus::Pending),
        Some("approved") => Ok(ApprovalStatus::Approved),
        Some("rejected") => Ok(ApprovalStatus::Rejected),
        Some("expired") => Ok(ApprovalStatus::Expired),
        other => Err(FabricError::Invariant(format!(
            "unknown approval status: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
