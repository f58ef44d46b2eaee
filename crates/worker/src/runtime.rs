// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker runtime: registration, heartbeats, claim loop, shutdown.
//!
//! Layout of tasks inside one worker process:
//! - the main loop claims tasks and spawns one execution task per claim,
//!   bounded by a semaphore sized to `max_concurrency`;
//! - the heartbeat task runs on its own interval timer, so a slow or
//!   stuck executor can never starve liveness;
//! - the fabric dispatch task routes coordination messages (shutdown,
//!   pause, resume, ping) to handlers registered here.
//!
//! Graceful shutdown: stop claiming, drain in-flight work up to the drain
//! timeout, fail leftovers as retryable, then deregister - which also
//! releases any locks and ports still attributed to this agent.

use crate::executor::Executor;
use crate::journal::{Journal, JournalOutcome};
use hive_core::{
    message::control, AgentDescriptor, AgentId, AgentStatus, Clock, FabricError, HiveConfig,
    LoadSnapshot, Task, TaskId,
};
use hive_engine::{spawn_maintenance, MaintenanceHandle, QueueEngine};
use hive_fabric::{handler_fn, MessagingFabric};
use hive_registry::{spawn_reaper, AgentRegistry, ReaperHandle};
use hive_store::Store;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Status values shared between the loops via one atomic.
const STATUS_ACTIVE: u8 = 1;
const STATUS_PAUSED: u8 = 2;
const STATUS_DRAINING: u8 = 3;

/// Backoff after a transient store error in the claim loop.
const CLAIM_ERROR_BACKOFF_MS: u64 = 250;

/// Poll interval while paused or draining.
const IDLE_POLL_MS: u64 = 20;

/// Configuration for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub agent_id: AgentId,
    pub class: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrency: u32,
    /// Bound on each blocking claim attempt
    pub claim_wait_ms: u64,
    pub journal_capacity: usize,
    /// Run the engine promoter/reaper and registry reaper in-process
    pub run_maintenance: bool,
}

impl WorkerConfig {
    pub fn new(agent_id: impl Into<AgentId>, class: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            class: class.into(),
            capabilities: BTreeSet::new(),
            max_concurrency: 1,
            claim_wait_ms: 1_000,
            journal_capacity: 256,
            run_maintenance: true,
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_claim_wait_ms(mut self, wait_ms: u64) -> Self {
        self.claim_wait_ms = wait_ms;
        self
    }

    pub fn without_maintenance(mut self) -> Self {
        self.run_maintenance = false;
        self
    }
}

struct Shared {
    load: AtomicU32,
    status: AtomicU8,
    journal: Journal,
}

impl Shared {
    fn status(&self) -> AgentStatus {
        match self.status.load(Ordering::SeqCst) {
            STATUS_PAUSED => AgentStatus::Paused,
            STATUS_DRAINING => AgentStatus::Draining,
            _ => AgentStatus::Active,
        }
    }
}

/// Entry point for running a worker.
pub struct Worker;

impl Worker {
    /// Register, wire up the runtime tasks, and start claiming.
    pub async fn spawn<C: Clock>(
        store: Arc<dyn Store>,
        clock: C,
        hive: HiveConfig,
        config: WorkerConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<WorkerHandle, FabricError> {
        let engine = QueueEngine::new(Arc::clone(&store), clock.clone(), hive.clone());
        let registry = AgentRegistry::new(Arc::clone(&store), clock.clone(), hive.clone());

        let descriptor = AgentDescriptor::new(
            config.agent_id.clone(),
            config.class.clone(),
            clock.epoch_ms(),
        )
        .with_capabilities(config.capabilities.iter().cloned())
        .with_max_concurrency(config.max_concurrency)
        .with_pid(std::process::id());
        let receipt = registry.register(&descriptor).await?;

        let fabric = Arc::new(
            MessagingFabric::start(Arc::clone(&store), config.agent_id.clone()).await?,
        );

        let shared = Arc::new(Shared {
            load: AtomicU32::new(0),
            status: AtomicU8::new(STATUS_ACTIVE),
            journal: Journal::new(config.journal_capacity),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        register_control_handlers(&fabric, &shared, &shutdown_tx, &config);

        let heartbeat = spawn_heartbeat(
            registry.clone(),
            config.agent_id.clone(),
            Arc::clone(&shared),
            receipt.heartbeat_period_ms,
            shutdown_rx.clone(),
        );

        let (maintenance, reaper) = if config.run_maintenance {
            (
                Some(spawn_maintenance(
                    engine.clone(),
                    vec![config.class.clone()],
                )),
                Some(spawn_reaper(registry.clone())),
            )
        } else {
            (None, None)
        };

        let main = spawn_main_loop(
            engine,
            registry,
            clock,
            hive,
            config.clone(),
            executor,
            Arc::clone(&shared),
            shutdown_rx,
        );

        info!(agent_id = %config.agent_id, class = %config.class, "worker started");
        Ok(WorkerHandle {
            agent_id: config.agent_id,
            shutdown_tx,
            main,
            heartbeat,
            shared,
            _fabric: fabric,
            maintenance,
            reaper,
        })
    }
}

fn register_control_handlers(
    fabric: &Arc<MessagingFabric>,
    shared: &Arc<Shared>,
    shutdown_tx: &watch::Sender<bool>,
    config: &WorkerConfig,
) {
    let tx = shutdown_tx.clone();
    fabric.register_handler(
        control::SHUTDOWN,
        handler_fn(move |_| {
            let tx = tx.clone();
            async move {
                info!("shutdown requested over coordination channel");
                let _ = tx.send(true);
                None
            }
        }),
    );

    let state = Arc::clone(shared);
    fabric.register_handler(
        control::PAUSE,
        handler_fn(move |_| {
            let state = Arc::clone(&state);
            async move {
                let _ = state.status.compare_exchange(
                    STATUS_ACTIVE,
                    STATUS_PAUSED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                None
            }
        }),
    );

    let state = Arc::clone(shared);
    fabric.register_handler(
        control::RESUME,
        handler_fn(move |_| {
            let state = Arc::clone(&state);
            async move {
                let _ = state.status.compare_exchange(
                    STATUS_PAUSED,
                    STATUS_ACTIVE,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                None
            }
        }),
    );

    let state = Arc::clone(shared);
    let agent_id = config.agent_id.clone();
    let class = config.class.clone();
    fabric.register_handler(
        control::PING,
        handler_fn(move |_| {
            let state = Arc::clone(&state);
            let agent_id = agent_id.clone();
            let class = class.clone();
            async move {
                Some(json!({
                    "agent_id": agent_id,
                    "class": class,
                    "load": state.load.load(Ordering::SeqCst),
                    "status": state.status().to_string(),
                }))
            }
        }),
    );
}

fn spawn_heartbeat<C: Clock>(
    registry: AgentRegistry<C>,
    agent_id: AgentId,
    shared: Arc<Shared>,
    period_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = LoadSnapshot {
                        current_load: shared.load.load(Ordering::SeqCst),
                        status: shared.status(),
                    };
                    match registry.heartbeat(&agent_id, snapshot).await {
                        Ok(()) => {}
                        // Deregistered under us; nothing left to report
                        Err(FabricError::NotFound(_)) => break,
                        Err(e) => warn!(agent_id = %agent_id, error = %e, "heartbeat failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_main_loop<C: Clock>(
    engine: QueueEngine<C>,
    registry: AgentRegistry<C>,
    clock: C,
    hive: HiveConfig,
    config: WorkerConfig,
    executor: Arc<dyn Executor>,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency as usize));
        let in_flight: Arc<Mutex<HashMap<TaskId, AbortHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let agent_str = config.agent_id.as_str().to_string();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if shared.status.load(Ordering::SeqCst) == STATUS_PAUSED {
                sleep_or_shutdown(IDLE_POLL_MS, &mut shutdown_rx).await;
                continue;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let claimed = tokio::select! {
                _ = shutdown_rx.changed() => {
                    drop(permit);
                    continue;
                }
                claimed = engine.claim_blocking(&config.class, &agent_str, config.claim_wait_ms) => claimed,
            };

            match claimed {
                Ok(Some(task)) => {
                    shared.load.fetch_add(1, Ordering::SeqCst);
                    shared.journal.record_start(
                        task.id.clone(),
                        &config.class,
                        task.attempt,
                        clock.epoch_ms(),
                    );

                    let task_id = task.id.clone();
                    let engine = engine.clone();
                    let executor = Arc::clone(&executor);
                    let shared = Arc::clone(&shared);
                    let clock = clock.clone();
                    let in_flight_map = Arc::clone(&in_flight);
                    let agent = agent_str.clone();

                    let inner_id = task_id.clone();
                    let handle = tokio::spawn(async move {
                        execute_one(&engine, executor.as_ref(), &task, &agent, &clock, &shared)
                            .await;
                        in_flight_map.lock().remove(&inner_id);
                        shared.load.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                    });
                    in_flight.lock().insert(task_id, handle.abort_handle());
                }
                Ok(None) => drop(permit),
                Err(FabricError::Paused(reason)) => {
                    drop(permit);
                    debug!(reason, "claims paused");
                    sleep_or_shutdown(config.claim_wait_ms.max(IDLE_POLL_MS), &mut shutdown_rx)
                        .await;
                }
                Err(e) if e.is_retryable() => {
                    drop(permit);
                    warn!(error = %e, "claim failed, backing off");
                    sleep_or_shutdown(CLAIM_ERROR_BACKOFF_MS, &mut shutdown_rx).await;
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "claim failed");
                    sleep_or_shutdown(CLAIM_ERROR_BACKOFF_MS, &mut shutdown_rx).await;
                }
            }
        }

        // -- graceful shutdown --
        shared.status.store(STATUS_DRAINING, Ordering::SeqCst);
        info!(agent_id = %config.agent_id, "worker draining");

        let drain_deadline = Instant::now() + Duration::from_millis(hive.drain_timeout_ms);
        while shared.load.load(Ordering::SeqCst) > 0 && Instant::now() < drain_deadline {
            tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)).await;
        }

        // Anything still running gets aborted and failed retryable so it
        // re-queues for another worker.
        let leftovers: Vec<(TaskId, AbortHandle)> = in_flight.lock().drain().collect();
        for (task_id, abort) in leftovers {
            abort.abort();
            shared
                .journal
                .record_outcome(&task_id, JournalOutcome::Abandoned, clock.epoch_ms());
            match engine
                .fail(
                    &config.class,
                    task_id.as_str(),
                    &agent_str,
                    "worker_shutdown",
                    true,
                )
                .await
            {
                Ok(_) => warn!(task_id = %task_id, "in-flight task failed as retryable on shutdown"),
                Err(FabricError::Conflict(_)) | Err(FabricError::NotFound(_)) => {}
                Err(e) => warn!(task_id = %task_id, error = %e, "failed to release task on shutdown"),
            }
        }

        if let Err(e) = registry.deregister(&config.agent_id).await {
            warn!(agent_id = %config.agent_id, error = %e, "deregister on shutdown failed");
        }
        info!(agent_id = %config.agent_id, "worker stopped");
    })
}

async fn execute_one<C: Clock>(
    engine: &QueueEngine<C>,
    executor: &dyn Executor,
    task: &Task,
    agent: &str,
    clock: &C,
    shared: &Shared,
) {
    let wall = Duration::from_millis(task.timeout_ms.max(1));
    let outcome = tokio::time::timeout(wall, executor.process(task)).await;

    match outcome {
        Ok(Ok(result)) => {
            match engine
                .complete(&task.class, task.id.as_str(), agent, Some(&result))
                .await
            {
                Ok(()) => {
                    shared.journal.record_outcome(
                        &task.id,
                        JournalOutcome::Completed,
                        clock.epoch_ms(),
                    );
                }
                Err(FabricError::Conflict(_)) => {
                    // Lease was lost mid-run; someone else owns the task now
                    warn!(task_id = %task.id, "completion rejected, task reassigned");
                    shared.journal.record_outcome(
                        &task.id,
                        JournalOutcome::Failed("reassigned".to_string()),
                        clock.epoch_ms(),
                    );
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "complete failed");
                    shared.journal.record_outcome(
                        &task.id,
                        JournalOutcome::Failed(e.to_string()),
                        clock.epoch_ms(),
                    );
                }
            }
        }
        Ok(Err(exec_err)) => {
            let retryable = exec_err.is_retryable();
            if let Err(e) = engine
                .fail(
                    &task.class,
                    task.id.as_str(),
                    agent,
                    &exec_err.to_string(),
                    retryable,
                )
                .await
            {
                warn!(task_id = %task.id, error = %e, "fail report rejected");
            }
            shared.journal.record_outcome(
                &task.id,
                JournalOutcome::Failed(exec_err.to_string()),
                clock.epoch_ms(),
            );
        }
        Err(_) => {
            if let Err(e) = engine
                .fail(&task.class, task.id.as_str(), agent, "timeout", true)
                .await
            {
                warn!(task_id = %task.id, error = %e, "timeout report rejected");
            }
            shared
                .journal
                .record_outcome(&task.id, JournalOutcome::TimedOut, clock.epoch_ms());
        }
    }
}

async fn sleep_or_shutdown(ms: u64, shutdown_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
        _ = shutdown_rx.changed() => {}
    }
}

/// Handle to a running worker.
pub struct WorkerHandle {
    agent_id: AgentId,
    shutdown_tx: watch::Sender<bool>,
    main: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    shared: Arc<Shared>,
    _fabric: Arc<MessagingFabric>,
    maintenance: Option<MaintenanceHandle>,
    reaper: Option<ReaperHandle>,
}

impl WorkerHandle {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn current_load(&self) -> u32 {
        self.shared.load.load(Ordering::SeqCst)
    }

    /// Snapshot of the journal, oldest first.
    pub fn journal(&self) -> Vec<crate::journal::JournalEntry> {
        self.shared.journal.recent()
    }

    /// Signal shutdown without waiting.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Graceful shutdown: stop claiming, drain, release, deregister.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.main.await;
        let _ = self.heartbeat.await;
        if let Some(maintenance) = self.maintenance {
            maintenance.stop().await;
        }
        if let Some(reaper) = self.reaper {
            reaper.stop().await;
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
