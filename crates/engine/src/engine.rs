// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue engine operations.
//!
//! Thin orchestration over the scripted transactions in
//! [`scripts`](crate::scripts): serialize inputs, run the script, map the
//! `outcome` field onto the error taxonomy. The engine itself holds no
//! state beyond its store handle, clock, and config, so it can be cloned
//! freely across tasks.

use crate::scripts;
use hive_core::{keys, Clock, Event, FabricError, HiveConfig, Priority, SystemClock, Task};
use hive_store::Store;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Candidate window examined for tie-breaks on claim.
const CLAIM_WINDOW: usize = 16;

/// Max entries moved per promoter pass.
const PROMOTE_BATCH: usize = 128;

/// Max pending entries rescored per pass.
const RESCORE_BATCH: usize = 512;

/// Where an enqueued task landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueDisposition {
    /// Added to `pending`, claimable now
    Queued,
    /// Class is paused; parked in `held` until resume
    Held,
}

/// Result of a fail operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Scheduled for retry; eligible at `ready_at_ms`
    Retry { ready_at_ms: u64 },
    /// Retries exhausted; parked in the dead-letter list
    Dead { attempt: u32 },
}

/// Per-class priority queue engine.
pub struct QueueEngine<C: Clock = SystemClock> {
    store: Arc<dyn Store>,
    clock: C,
    config: HiveConfig,
}

impl<C: Clock> Clone for QueueEngine<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Clock> QueueEngine<C> {
    pub fn new(store: Arc<dyn Store>, clock: C, config: HiveConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
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

    // -- producer surface --

    /// Write the task record and queue it for claiming.
    ///
    /// If the class is paused the record is written but parked in `held`
    /// until [`resume`](Self::resume).
    pub async fn enqueue(&self, task: &Task) -> Result<EnqueueDisposition, FabricError> {
        if task.class.is_empty() {
            return Err(FabricError::Invariant("task has no class".to_string()));
        }
        let envelope = serde_json::to_string(task)
            .map_err(|e| FabricError::Invariant(format!("serialize task: {}", e)))?;
        let hint = serde_json::to_string(&Event::TaskEnqueued {
            task_id: task.id.clone(),
            class: task.class.clone(),
            priority: task.priority,
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;

        let reply = self
            .run_script(
                &scripts::ENQUEUE,
                &[
                    keys::tasks(&task.class),
                    keys::pending(&task.class),
                    keys::held(&task.class),
                    keys::queue_state(&task.class),
                ],
                &[
                    task.id.as_str().to_string(),
                    envelope,
                    task.priority.base_score().to_string(),
                    keys::ch_task_enqueued(&task.class),
                    hint,
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("queued") => {
                debug!(task_id = %task.id, class = %task.class, priority = %task.priority, "task enqueued");
                Ok(EnqueueDisposition::Queued)
            }
            Some("held") => {
                debug!(task_id = %task.id, class = %task.class, "class paused, task held");
                Ok(EnqueueDisposition::Held)
            }
            other => Err(FabricError::Invariant(format!(
                "unexpected enqueue outcome: {:?}",
                other
            ))),
        }
    }

    // -- worker surface --

    /// Claim the highest-priority pending task for `class`.
    ///
    /// Returns `Ok(None)` when the queue is empty and
    /// `Err(FabricError::Paused)` when the class is paused or an emergency
    /// stop is active.
    pub async fn claim(&self, class: &str, agent_id: &str) -> Result<Option<Task>, FabricError> {
        let mut reply = self
            .run_script(
                &scripts::CLAIM,
                &[
                    keys::tasks(class),
                    keys::pending(class),
                    keys::processing(class),
                    keys::queue_state(class),
                    keys::EMERGENCY_STOP.to_string(),
                ],
                &[
                    agent_id.to_string(),
                    self.now_ms().to_string(),
                    CLAIM_WINDOW.to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("claimed") => {
                let task: Task = serde_json::from_value(reply["task"].take())
                    .map_err(|e| FabricError::Invariant(format!("claimed task envelope: {}", e)))?;
                debug!(task_id = %task.id, class, agent_id, attempt = task.attempt, "task claimed");
                Ok(Some(task))
            }
            Some("empty") => Ok(None),
            Some("paused") => match reply["scope"].as_str() {
                Some("emergency") => Err(FabricError::Paused("emergency stop".to_string())),
                _ => Err(FabricError::Paused(format!("class {} paused", class))),
            },
            other => Err(FabricError::Invariant(format!(
                "unexpected claim outcome: {:?}",
                other
            ))),
        }
    }

    /// Claim with a bounded wait.
    ///
    /// Subscribes to the class's enqueue hints before the first attempt so
    /// a task published between attempts cannot be missed; after losing a
    /// claim race the next hint (or the deadline) retries.
    pub async fn claim_blocking(
        &self,
        class: &str,
        agent_id: &str,
        wait_ms: u64,
    ) -> Result<Option<Task>, FabricError> {
        let deadline = Instant::now() + Duration::from_millis(wait_ms);
        let channels = [keys::ch_task_enqueued(class)];
        let mut sub = self.store.subscribe(&channels).await?;

        loop {
            if let Some(task) = self.claim(class, agent_id).await? {
                return Ok(Some(task));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, sub.recv()).await {
                Ok(Some(_hint)) => continue,
                Ok(None) => {
                    // Subscription dropped by the backend; re-establish
                    sub = self.store.subscribe(&channels).await?;
                }
                Err(_) => return Ok(None),
            }
        }
    }

    /// Report successful execution. Rejected with `Conflict` if the lease
    /// was lost to another agent.
    pub async fn complete(
        &self,
        class: &str,
        task_id: &str,
        agent_id: &str,
        result: Option<&Value>,
    ) -> Result<(), FabricError> {
        let result_json = match result {
            Some(value) => value.to_string(),
            None => String::new(),
        };
        let reply = self
            .run_script(
                &scripts::COMPLETE,
                &[keys::tasks(class), keys::processing(class)],
                &[
                    task_id.to_string(),
                    agent_id.to_string(),
                    keys::CH_TASK_COMPLETED.to_string(),
                    result_json,
                    class.to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                info!(task_id, class, agent_id, "task completed");
                Ok(())
            }
            Some("conflict") => Err(FabricError::Conflict(format!(
                "task {} no longer owned by {}",
                task_id, agent_id
            ))),
            Some("notfound") => Err(FabricError::NotFound(format!("task {}", task_id))),
            other => Err(FabricError::Invariant(format!(
                "unexpected complete outcome: {:?}",
                other
            ))),
        }
    }

    /// Report failed execution.
    ///
    /// Retryable failures with attempts left are scheduled into `delayed`
    /// with the engine's backoff policy; otherwise the task dead-letters.
    pub async fn fail(
        &self,
        class: &str,
        task_id: &str,
        agent_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailDisposition, FabricError> {
        // The attempt count drives the backoff delay; the ownership check
        // inside the script protects against the entry changing under us.
        let attempt = match self.store.hget(&keys::processing(class), task_id).await? {
            Some(rec) => serde_json::from_str::<Value>(&rec)
                .ok()
                .and_then(|v| v["attempt"].as_u64())
                .unwrap_or(1) as u32,
            None => 1,
        };
        self.fail_inner(class, task_id, Some(agent_id), None, error, retryable, attempt)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail_inner(
        &self,
        class: &str,
        task_id: &str,
        agent_id: Option<&str>,
        expected_attempt: Option<u32>,
        error: &str,
        retryable: bool,
        attempt_for_delay: u32,
    ) -> Result<FailDisposition, FabricError> {
        let delay = self.config.retry.delay_ms(attempt_for_delay);
        let reply = self
            .run_script(
                &scripts::FAIL,
                &[
                    keys::tasks(class),
                    keys::processing(class),
                    keys::delayed(class),
                    keys::dead(class),
                ],
                &[
                    task_id.to_string(),
                    agent_id.unwrap_or("").to_string(),
                    expected_attempt.map(|a| a.to_string()).unwrap_or_default(),
                    error.to_string(),
                    if retryable { "1" } else { "0" }.to_string(),
                    self.now_ms().to_string(),
                    delay.to_string(),
                    keys::CH_TASK_DEAD.to_string(),
                    class.to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("retry") => {
                let ready_at_ms = reply["ready_at_ms"].as_u64().unwrap_or(0);
                info!(task_id, class, error, ready_at_ms, "task failed, retry scheduled");
                Ok(FailDisposition::Retry { ready_at_ms })
            }
            Some("dead") => {
                let attempt = reply["attempt"].as_u64().unwrap_or(0) as u32;
                warn!(task_id, class, error, attempt, "task dead-lettered");
                Ok(FailDisposition::Dead { attempt })
            }
            Some("conflict") => Err(FabricError::Conflict(format!(
                "task {} no longer owned by caller",
                task_id
            ))),
            Some("notfound") => Err(FabricError::NotFound(format!("task {}", task_id))),
            other => Err(FabricError::Invariant(format!(
                "unexpected fail outcome: {:?}",
                other
            ))),
        }
    }

    // -- maintenance surface --

    /// Move due entries from `delayed` into `pending`. Returns how many
    /// moved.
    pub async fn promote_due(&self, class: &str) -> Result<u64, FabricError> {
        let reply = self
            .run_script(
                &scripts::PROMOTE,
                &[
                    keys::tasks(class),
                    keys::delayed(class),
                    keys::pending(class),
                    keys::held(class),
                    keys::queue_state(class),
                ],
                &[
                    self.now_ms().to_string(),
                    PROMOTE_BATCH.to_string(),
                    keys::ch_task_enqueued(class),
                    class.to_string(),
                ],
            )
            .await?;
        Ok(reply["promoted"].as_u64().unwrap_or(0))
    }

    /// Refresh age-boosted scores so queued tasks cannot starve.
    pub async fn rescore_pending(&self, class: &str) -> Result<u64, FabricError> {
        let reply = self
            .run_script(
                &scripts::RESCORE,
                &[keys::tasks(class), keys::pending(class)],
                &[self.now_ms().to_string(), RESCORE_BATCH.to_string()],
            )
            .await?;
        Ok(reply["rescored"].as_u64().unwrap_or(0))
    }

    /// Fail every processing entry whose lease expired, as retryable
    /// `lease_expired`. Returns how many leases were reaped.
    pub async fn reap_expired_leases(&self, class: &str) -> Result<u64, FabricError> {
        let now = self.now_ms();
        let entries = self.store.hgetall(&keys::processing(class)).await?;
        let mut reaped = 0u64;

        for (task_id, raw) in entries {
            let Ok(rec) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let deadline = rec["claim_deadline_ms"].as_u64().unwrap_or(u64::MAX);
            if deadline >= now {
                continue;
            }
            let attempt = rec["attempt"].as_u64().unwrap_or(1) as u32;
            match self
                .fail_inner(
                    class,
                    &task_id,
                    None,
                    Some(attempt),
                    "lease_expired",
                    true,
                    attempt,
                )
                .await
            {
                Ok(disposition) => {
                    warn!(task_id = %task_id, class, ?disposition, "expired lease reaped");
                    reaped += 1;
                }
                // Someone else re-claimed or finished it between the scan
                // and the script; nothing to do.
                Err(FabricError::Conflict(_)) | Err(FabricError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    // -- operator surface --

    /// Change a task's priority band.
    ///
    /// Pending tasks are rescored immediately; processing tasks keep their
    /// current execution and pick the new band up on retry.
    pub async fn reprioritize(
        &self,
        class: &str,
        task_id: &str,
        new_priority: Priority,
        reason: &str,
    ) -> Result<(), FabricError> {
        let reply = self
            .run_script(
                &scripts::REPRIORITIZE,
                &[keys::tasks(class), keys::pending(class)],
                &[
                    task_id.to_string(),
                    new_priority.to_string(),
                    reason.to_string(),
                    self.now_ms().to_string(),
                    keys::CH_COORDINATION.to_string(),
                    class.to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                info!(task_id, class, %new_priority, reason, "task reprioritized");
                Ok(())
            }
            Some("notfound") => Err(FabricError::NotFound(format!("task {}", task_id))),
            Some("conflict") => Err(FabricError::Conflict(format!(
                "task {} is terminal",
                task_id
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected reprioritize outcome: {:?}",
                other
            ))),
        }
    }

    /// Merge extra context into a task's payload and/or append to its
    /// prompt suffix. Rejected once the task is terminal; a processing
    /// task keeps its current execution and the change applies on retry.
    pub async fn add_context(
        &self,
        class: &str,
        task_id: &str,
        context: Option<&Value>,
        prompt_suffix: Option<&str>,
    ) -> Result<(), FabricError> {
        let reply = self
            .run_script(
                &scripts::ADD_CONTEXT,
                &[keys::tasks(class)],
                &[
                    task_id.to_string(),
                    context.map(|c| c.to_string()).unwrap_or_default(),
                    prompt_suffix.unwrap_or("").to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => Ok(()),
            Some("notfound") => Err(FabricError::NotFound(format!("task {}", task_id))),
            Some("conflict") => Err(FabricError::Conflict(format!(
                "task {} is terminal",
                task_id
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected add_context outcome: {:?}",
                other
            ))),
        }
    }

    /// Pause claiming for one class. Tasks enqueued while paused are
    /// parked in `held`.
    pub async fn pause(&self, class: &str, reason: &str) -> Result<(), FabricError> {
        let event = serde_json::to_string(&Event::QueuePaused {
            class: class.to_string(),
            reason: reason.to_string(),
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;
        self.run_script(
            &scripts::PAUSE,
            &[keys::queue_state(class)],
            &[
                self.now_ms().to_string(),
                reason.to_string(),
                keys::CH_COORDINATION.to_string(),
                event,
            ],
        )
        .await?;
        warn!(class, reason, "queue paused");
        Ok(())
    }

    /// Resume a paused class, draining `held` into `pending` in arrival
    /// order.
    pub async fn resume(&self, class: &str) -> Result<u64, FabricError> {
        let event = serde_json::to_string(&Event::QueueResumed {
            class: class.to_string(),
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;
        let reply = self
            .run_script(
                &scripts::RESUME,
                &[
                    keys::queue_state(class),
                    keys::held(class),
                    keys::pending(class),
                    keys::tasks(class),
                ],
                &[
                    self.now_ms().to_string(),
                    keys::CH_COORDINATION.to_string(),
                    event,
                    keys::ch_task_enqueued(class),
                    class.to_string(),
                ],
            )
            .await?;
        let drained = reply["drained"].as_u64().unwrap_or(0);
        info!(class, drained, "queue resumed");
        Ok(drained)
    }

    /// Move everything from the dead-letter list back to `pending` with a
    /// fresh attempt budget.
    pub async fn requeue_failed(&self, class: &str) -> Result<u64, FabricError> {
        let reply = self
            .run_script(
                &scripts::REQUEUE_FAILED,
                &[keys::tasks(class), keys::dead(class), keys::pending(class)],
                &[
                    self.now_ms().to_string(),
                    keys::ch_task_enqueued(class),
                    class.to_string(),
                ],
            )
            .await?;
        let requeued = reply["requeued"].as_u64().unwrap_or(0);
        info!(class, requeued, "dead-letter queue requeued");
        Ok(requeued)
    }

    /// Halt all claims across every class until
    /// [`clear_emergency_stop`](Self::clear_emergency_stop).
    pub async fn emergency_stop(&self, reason: &str) -> Result<(), FabricError> {
        self.store.set(keys::EMERGENCY_STOP, reason).await?;
        let event = serde_json::to_string(&Event::EmergencyStop {
            reason: reason.to_string(),
        })
        .map_err(|e| FabricError::Invariant(e.to_string()))?;
        self.store.publish(keys::CH_COORDINATION, &event).await?;
        self.store.publish(keys::CH_BROADCAST, &event).await?;
        warn!(reason, "EMERGENCY STOP engaged");
        Ok(())
    }

    /// Lift the emergency stop. Explicit and deliberate; nothing resumes
    /// it automatically.
    pub async fn clear_emergency_stop(&self) -> Result<(), FabricError> {
        self.store.del(keys::EMERGENCY_STOP).await?;
        let event = serde_json::to_string(&Event::EmergencyCleared)
            .map_err(|e| FabricError::Invariant(e.to_string()))?;
        self.store.publish(keys::CH_COORDINATION, &event).await?;
        self.store.publish(keys::CH_BROADCAST, &event).await?;
        info!("emergency stop cleared");
        Ok(())
    }

    pub async fn is_emergency_stopped(&self) -> Result<bool, FabricError> {
        Ok(self.store.get(keys::EMERGENCY_STOP).await?.is_some())
    }

    /// Fetch a task's current envelope.
    pub async fn task(&self, class: &str, task_id: &str) -> Result<Task, FabricError> {
        let raw = self
            .store
            .hget(&keys::tasks(class), task_id)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("task {}", task_id)))?;
        serde_json::from_str(&raw)
            .map_err(|e| FabricError::Invariant(format!("task envelope: {}", e)))
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
