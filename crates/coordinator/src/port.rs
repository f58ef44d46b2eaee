// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port reservations.
//!
//! A reservation is a plain `SET NX PX` key (`locks:port:{port}`) holding
//! the agent id, so the TTL is native to the store. Before granting, the
//! coordinator probes the local OS: a port already bound by some process
//! outside the fabric is `Busy` even if no reservation exists.

use crate::file_lock::ResourceCoordinator;
use crate::scripts;
use hive_core::{keys, AgentId, Clock, FabricError};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use tracing::debug;

impl<C: Clock> ResourceCoordinator<C> {
    /// Reserve `port` for `agent`. Re-reserving one's own port refreshes
    /// the TTL.
    pub async fn reserve_port(
        &self,
        port: u16,
        agent: &AgentId,
        purpose: &str,
        ttl_ms: u64,
    ) -> Result<(), FabricError> {
        if port_bound_locally(port) {
            return Err(FabricError::Busy(format!(
                "port {} already bound by another process",
                port
            )));
        }

        let reply = self
            .run_script(
                &scripts::RESERVE_PORT,
                &[keys::port_lock(port), keys::AGENTS_REGISTRY.to_string()],
                &[
                    agent.as_str().to_string(),
                    ttl_ms.to_string(),
                    port.to_string(),
                ],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => {
                debug!(port, agent = %agent, purpose, "port reserved");
                Ok(())
            }
            Some("busy") => Err(FabricError::Busy(format!(
                "port {} reserved by {}",
                port,
                reply["holder"].as_str().unwrap_or("unknown")
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected reserve outcome: {:?}",
                other
            ))),
        }
    }

    /// Release a reservation. Idempotent for the holder; releasing someone
    /// else's reservation is a `Conflict`.
    pub async fn release_port(&self, port: u16, agent: &AgentId) -> Result<(), FabricError> {
        let reply = self
            .run_script(
                &scripts::RELEASE_PORT,
                &[keys::port_lock(port), keys::AGENTS_REGISTRY.to_string()],
                &[agent.as_str().to_string(), port.to_string()],
            )
            .await?;

        match reply["outcome"].as_str() {
            Some("ok") => Ok(()),
            Some("conflict") => Err(FabricError::Conflict(format!(
                "port {} reserved by {}",
                port,
                reply["holder"].as_str().unwrap_or("unknown")
            ))),
            other => Err(FabricError::Invariant(format!(
                "unexpected release outcome: {:?}",
                other
            ))),
        }
    }

    /// Current reservation holder, if any.
    pub async fn port_holder(&self, port: u16) -> Result<Option<AgentId>, FabricError> {
        Ok(self
            .store()
            .get(&keys::port_lock(port))
            .await?
            .map(AgentId::new))
    }
}

/// Check whether something outside the fabric already listens on `port`.
fn port_bound_locally(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_err()
}

#[cfg(test)]
#[path = "port_tests.rs"]
mod tests;
