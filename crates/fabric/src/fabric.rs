// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging fabric: channels, handler dispatch, request/reply.

use async_trait::async_trait;
use hive_core::{keys, AgentId, FabricError, IdMinter, Message, Recipient, UuidMinter};
use hive_store::Store;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Handles one message kind. Invocations run on their own task, so a slow
/// handler cannot starve dispatch (or the worker's heartbeat).
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process a message; a `Some` return is published as the reply when
    /// the message asked for one.
    async fn handle(&self, message: Message) -> Option<serde_json::Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<serde_json::Value>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Option<serde_json::Value> {
        (self.0)(message).await
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<serde_json::Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type HandlerMap = Arc<RwLock<HashMap<String, Arc<dyn MessageHandler>>>>;
type RawHandler = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

/// One worker's attachment to the messaging fabric.
///
/// Subscribes to `agent:direct:{id}`, `agent:broadcast`, and
/// `agent:coordination`; a dispatch task routes incoming messages to the
/// registered handlers. Dropping the fabric stops dispatch.
pub struct MessagingFabric<I: IdMinter = UuidMinter> {
    store: Arc<dyn Store>,
    agent_id: AgentId,
    minter: I,
    handlers: HandlerMap,
    raw_handler: RawHandler,
    dispatch: JoinHandle<()>,
}

impl MessagingFabric<UuidMinter> {
    /// Attach to the fabric with UUID correlation ids.
    pub async fn start(store: Arc<dyn Store>, agent_id: AgentId) -> Result<Self, FabricError> {
        Self::start_with_minter(store, agent_id, UuidMinter).await
    }
}

impl<I: IdMinter> MessagingFabric<I> {
    pub async fn start_with_minter(
        store: Arc<dyn Store>,
        agent_id: AgentId,
        minter: I,
    ) -> Result<Self, FabricError> {
        let channels = [
            keys::ch_direct(&agent_id),
            keys::CH_BROADCAST.to_string(),
            keys::CH_COORDINATION.to_string(),
        ];
        let mut sub = store.subscribe(&channels).await?;

        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let raw_handler: RawHandler = Arc::new(RwLock::new(None));

        let dispatch = {
            let store = Arc::clone(&store);
            let agent_id = agent_id.clone();
            let handlers = Arc::clone(&handlers);
            let raw_handler = Arc::clone(&raw_handler);
            tokio::spawn(async move {
                while let Some((channel, payload)) = sub.recv().await {
                    let message: Message = match serde_json::from_str(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(%channel, error = %e, "dropping undecodable message");
                            continue;
                        }
                    };
                    // Loop guard: never dispatch our own messages
                    if message.sender == agent_id {
                        continue;
                    }
                    let handler = {
                        let map = handlers.read();
                        match map.get(&message.kind) {
                            Some(handler) => Some(Arc::clone(handler)),
                            None => raw_handler.read().as_ref().map(Arc::clone),
                        }
                    };
                    let Some(handler) = handler else {
                        trace!(kind = %message.kind, "no handler registered, dropping");
                        continue;
                    };

                    let store = Arc::clone(&store);
                    let agent_id = agent_id.clone();
                    tokio::spawn(async move {
                        let reply_to = message.reply_to.clone();
                        let correlation_id = message.correlation_id.clone();
                        let sender = message.sender.clone();
                        let wants_reply = message.wants_reply();
                        let kind = message.kind.clone();

                        let result = handler.handle(message).await;

                        if let (Some(value), true) = (result, wants_reply) {
                            let reply = Message {
                                kind: format!("{}:reply", kind),
                                sender: agent_id,
                                recipient: Recipient::Agent(sender),
                                correlation_id,
                                reply_to: None,
                                payload: value,
                            };
                            if let Some(reply_channel) = reply_to {
                                if let Ok(encoded) = serde_json::to_string(&reply) {
                                    if let Err(e) = store.publish(&reply_channel, &encoded).await {
                                        warn!(error = %e, "failed to publish reply");
                                    }
                                }
                            }
                        }
                    });
                }
            })
        };

        Ok(Self {
            store,
            agent_id,
            minter,
            handlers,
            raw_handler,
            dispatch,
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Register a handler for one message kind. A duplicate registration
    /// replaces the previous handler.
    pub fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let kind = kind.into();
        debug!(%kind, "handler registered");
        self.handlers.write().insert(kind, handler);
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister_handler(&self, kind: &str) -> bool {
        self.handlers.write().remove(kind).is_some()
    }

    /// Opt into receiving messages of unknown kinds.
    pub fn register_raw_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.raw_handler.write() = Some(handler);
    }

    /// Fire-and-forget message to one agent. Messages to oneself are
    /// dropped.
    pub async fn send_direct(
        &self,
        recipient: &AgentId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), FabricError> {
        if recipient == &self.agent_id {
            trace!(kind, "dropping self-addressed message");
            return Ok(());
        }
        let message = Message::new(
            kind,
            self.agent_id.clone(),
            Recipient::Agent(recipient.clone()),
            payload,
        );
        self.publish_message(&keys::ch_direct(recipient), &message)
            .await
    }

    /// Fan-out to every worker. Our own dispatch skips the echo.
    pub async fn broadcast(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), FabricError> {
        let message = Message::new(
            kind,
            self.agent_id.clone(),
            Recipient::Broadcast,
            payload,
        );
        self.publish_message(keys::CH_BROADCAST, &message).await
    }

    /// Control-plane fan-out (shutdown, config push, registry events).
    pub async fn send_coordination(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), FabricError> {
        let message = Message::new(
            kind,
            self.agent_id.clone(),
            Recipient::Broadcast,
            payload,
        );
        self.publish_message(keys::CH_COORDINATION, &message).await
    }

    /// Send a request and await the matching reply.
    ///
    /// A private reply topic keyed by the correlation id is subscribed
    /// before the request is published; on deadline the caller sees
    /// `Timeout` and any late reply lands on a dropped subscription.
    pub async fn request(
        &self,
        recipient: &AgentId,
        kind: &str,
        payload: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<Message, FabricError> {
        if recipient == &self.agent_id {
            return Err(FabricError::Invariant(
                "request addressed to self".to_string(),
            ));
        }
        let correlation_id = self.minter.mint();
        let reply_channel = keys::ch_reply(&correlation_id);
        let mut sub = self.store.subscribe(&[reply_channel.clone()]).await?;

        let message = Message {
            kind: kind.to_string(),
            sender: self.agent_id.clone(),
            recipient: Recipient::Agent(recipient.clone()),
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(reply_channel),
            payload,
        };
        self.publish_message(&keys::ch_direct(recipient), &message)
            .await?;

        let wait = Duration::from_millis(timeout_ms);
        let reply = tokio::time::timeout(wait, async {
            while let Some((_, payload)) = sub.recv().await {
                match serde_json::from_str::<Message>(&payload) {
                    Ok(reply) if reply.correlation_id.as_deref() == Some(&correlation_id) => {
                        return Some(reply);
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable reply");
                        continue;
                    }
                }
            }
            None
        })
        .await;

        match reply {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(FabricError::Transient(
                "reply subscription closed".to_string(),
            )),
            Err(_) => Err(FabricError::Timeout(format!(
                "no reply to {} from {} within {}ms",
                kind, recipient, timeout_ms
            ))),
        }
    }

    async fn publish_message(
        &self,
        channel: &str,
        message: &Message,
    ) -> Result<(), FabricError> {
        let encoded = serde_json::to_string(message)
            .map_err(|e| FabricError::Invariant(format!("serialize message: {}", e)))?;
        self.store.publish(channel, &encoded).await
    }
}

impl<I: IdMinter> Drop for MessagingFabric<I> {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

#[cfg(test)]
#[path = "fabric_tests.rs"]
mod tests;
