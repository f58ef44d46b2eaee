// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background maintenance: delayed-set promotion, age-boost rescoring,
//! and lease reaping.
//!
//! One spawned task services a set of classes on the engine's configured
//! periods. Store errors are logged and the loop keeps going; a transient
//! store outage must not kill maintenance.

use crate::engine::QueueEngine;
use hive_core::Clock;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a running maintenance task.
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal shutdown and wait for the loop to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the maintenance loop for `classes`.
pub fn spawn_maintenance<C: Clock>(
    engine: QueueEngine<C>,
    classes: Vec<String>,
) -> MaintenanceHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let promoter_period = Duration::from_millis(engine.config().promoter_period_ms.max(1));
    let reaper_period = Duration::from_millis(engine.config().lease_reaper_period_ms.max(1));

    let handle = tokio::spawn(async move {
        let mut promoter = tokio::time::interval(promoter_period);
        let mut reaper = tokio::time::interval(reaper_period);
        promoter.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        reaper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = promoter.tick() => {
                    for class in &classes {
                        if let Err(e) = engine.promote_due(class).await {
                            warn!(%class, error = %e, "promoter pass failed");
                        }
                        if let Err(e) = engine.rescore_pending(class).await {
                            warn!(%class, error = %e, "rescore pass failed");
                        }
                    }
                }
                _ = reaper.tick() => {
                    for class in &classes {
                        if let Err(e) = engine.reap_expired_leases(class).await {
                            warn!(%class, error = %e, "lease reap pass failed");
                        }
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

    MaintenanceHandle {
        shutdown_tx,
        handle,
    }
}
