//! Request/response transport between isolated contexts.
//!
//! Contexts share nothing but this bus, and everything crossing it is a
//! JSON string. Each call carries its own reply channel, so the bus keeps
//! no per-connection state beyond the inbox of each context.

pub mod endpoint;

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;
use uuid::Uuid;

pub use endpoint::*;

const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Page,
    Coordinator,
}

impl ContextId {
    pub fn name(&self) -> &'static str {
        match self {
            ContextId::Page => "page",
            ContextId::Coordinator => "coordinator",
        }
    }
}

#[derive(Default)]
pub struct BusMetrics {
    pub sent_total: AtomicU64,
    pub undeliverable_total: AtomicU64,
    pub discarded_replies_total: AtomicU64,
}

impl BusMetrics {
    pub fn record_undeliverable(&self) {
        self.undeliverable_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded_reply(&self) {
        self.discarded_replies_total.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<MessageBusInner>,
}

#[derive(Default)]
struct MessageBusInner {
    inboxes: RwLock<HashMap<ContextId, mpsc::Sender<Envelope>>>,
    metrics: Arc<BusMetrics>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.inner.metrics
    }

    /// Opens a fresh inbox for `context`, replacing any previous one.
    pub fn connect(&self, context: ContextId) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner
            .inboxes
            .write()
            .expect("MessageBus poisoned")
            .insert(context, tx);
        debug!(context = context.name(), "Context connected");
        rx
    }

    pub fn disconnect(&self, context: ContextId) {
        let removed = self
            .inner
            .inboxes
            .write()
            .expect("MessageBus poisoned")
            .remove(&context);
        if removed.is_some() {
            debug!(context = context.name(), "Context disconnected");
        }
    }

    pub fn is_connected(&self, context: ContextId) -> bool {
        self.inner
            .inboxes
            .read()
            .expect("MessageBus poisoned")
            .get(&context)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Connects `endpoint` and serves it on its own task.
    pub fn serve<E: Endpoint>(
        &self,
        endpoint: E,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let inbox = self.connect(E::CONTEXT);
        tokio::spawn(endpoint.run(inbox, Arc::clone(&self.inner.metrics), shutdown))
    }

    /// Sends one request and waits for its reply. `None` when the context is
    /// not connected, ignored the action, or dropped the reply.
    pub async fn send(&self, target: ContextId, action: &str, payload: Value) -> Option<Value> {
        let inbox = self
            .inner
            .inboxes
            .read()
            .expect("MessageBus poisoned")
            .get(&target)
            .cloned();
        let Some(inbox) = inbox else {
            self.inner.metrics.record_undeliverable();
            debug!(context = target.name(), action, "Context not connected");
            return None;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            id: Uuid::new_v4(),
            action: action.to_string(),
            payload: payload.to_string(),
            reply: Some(reply_tx),
        };
        let id = envelope.id;

        self.inner.metrics.sent_total.fetch_add(1, Ordering::Relaxed);
        if inbox.send(envelope).await.is_err() {
            self.inner.metrics.record_undeliverable();
            debug!(%id, context = target.name(), action, "Context inbox closed");
            return None;
        }

        let reply = reply_rx.await.ok()?;
        match serde_json::from_str(&reply) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(%id, "Unreadable reply: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    struct Echo;

    impl Endpoint for Echo {
        const CONTEXT: ContextId = ContextId::Coordinator;

        fn dispatch(&self, action: &str, payload: Value) -> Dispatch {
            match action {
                "echo" => Dispatch::Immediate(payload),
                "slow" => Dispatch::deferred(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    json!({"success": true, "late": payload})
                }),
                _ => Dispatch::Ignored,
            }
        }
    }

    #[tokio::test]
    async fn immediate_reply_round_trips() {
        let bus = MessageBus::new();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.serve(Echo, shutdown_rx);

        let reply = bus
            .send(ContextId::Coordinator, "echo", json!({"a": [1, 2]}))
            .await;
        assert_eq!(reply, Some(json!({"a": [1, 2]})));
    }

    #[tokio::test]
    async fn unknown_action_and_missing_context_give_none() {
        let bus = MessageBus::new();
        assert_eq!(bus.send(ContextId::Page, "echo", json!({})).await, None);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.serve(Echo, shutdown_rx);
        assert_eq!(bus.send(ContextId::Coordinator, "nope", json!({})).await, None);
        assert_eq!(bus.metrics().undeliverable_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_reply_keeps_the_channel_open() {
        let bus = MessageBus::new();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.serve(Echo, shutdown_rx);

        // deferred work does not block the next message
        let slow = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.send(ContextId::Coordinator, "slow", json!(1)).await })
        };
        let fast = bus.send(ContextId::Coordinator, "echo", json!(2)).await;
        assert_eq!(fast, Some(json!(2)));

        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow["late"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_to_a_vanished_sender_is_discarded() {
        let bus = MessageBus::new();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.serve(Echo, shutdown_rx);

        let caller = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.send(ContextId::Coordinator, "slow", json!(1)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(
            bus.metrics().discarded_replies_total.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn shutdown_and_reconnect() {
        let bus = MessageBus::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = bus.serve(Echo, shutdown_rx);
        assert!(bus.is_connected(ContextId::Coordinator));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(!bus.is_connected(ContextId::Coordinator));
        assert_eq!(bus.send(ContextId::Coordinator, "echo", json!(1)).await, None);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.serve(Echo, shutdown_rx);
        assert_eq!(
            bus.send(ContextId::Coordinator, "echo", json!(1)).await,
            Some(json!(1))
        );
    }
}
