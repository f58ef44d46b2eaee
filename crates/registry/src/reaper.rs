// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic dead-agent sweep.

use crate::registry::AgentRegistry;
use hive_core::Clock;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a running reaper task.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal shutdown and wait for the sweep loop to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the registry reaper on the configured period.
pub fn spawn_reaper<C: Clock>(registry: AgentRegistry<C>) -> ReaperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let period = Duration::from_millis(registry.config().reaper_period_ms.max(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = registry.reap_dead().await {
                        warn!(error = %e, "reaper sweep failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    ReaperHandle {
        shutdown_tx,
        handle,
    }
}
