use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    bus::{BusMetrics, ContextId},
    error::KratkoError,
};

pub type ReplyFuture = Pin<Box<dyn Future<Output = Value> + Send>>;

/// One serialized request travelling to a context.
pub struct Envelope {
    pub id: Uuid,
    pub action: String,
    pub payload: String,
    pub(crate) reply: Option<oneshot::Sender<String>>,
}

/// What an endpoint does with one request.
pub enum Dispatch {
    /// Unknown action: no reply, the caller sees `None`.
    Ignored,
    /// Answered before the next message is taken.
    Immediate(Value),
    /// Answered once the future resolves; the reply channel stays open.
    Deferred(ReplyFuture),
}

impl Dispatch {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Value> + Send + 'static,
    {
        Dispatch::Deferred(Box::pin(future))
    }
}

pub trait Endpoint: Send + Sync + Sized + 'static {
    const CONTEXT: ContextId;

    fn dispatch(&self, action: &str, payload: Value) -> Dispatch;

    /// Serves the inbox until shutdown or until every sender is gone.
    fn run(
        self,
        mut inbox: mpsc::Receiver<Envelope>,
        metrics: Arc<BusMetrics>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> impl Future<Output = ()> + Send {
        async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    envelope = inbox.recv() => match envelope {
                        Some(envelope) => self.handle(envelope, &metrics),
                        None => break,
                    },
                }
            }
            debug!(context = Self::CONTEXT.name(), "Endpoint stopped");
        }
    }

    fn handle(&self, envelope: Envelope, metrics: &Arc<BusMetrics>) {
        let Envelope {
            id,
            action,
            payload,
            reply,
        } = envelope;

        let payload: Value = match serde_json::from_str(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%id, action = action.as_str(), "Unreadable payload: {e}");
                deliver(reply, KratkoError::from(e).to_wire(), id, metrics);
                return;
            }
        };

        match self.dispatch(&action, payload) {
            Dispatch::Ignored => {
                debug!(%id, action = action.as_str(), context = Self::CONTEXT.name(), "Ignoring action");
            }
            Dispatch::Immediate(value) => deliver(reply, value, id, metrics),
            Dispatch::Deferred(future) => {
                let metrics = Arc::clone(metrics);
                tokio::spawn(async move {
                    let value = future.await;
                    deliver(reply, value, id, &metrics);
                });
            }
        }
    }
}

fn deliver(reply: Option<oneshot::Sender<String>>, value: Value, id: Uuid, metrics: &BusMetrics) {
    let Some(reply) = reply else {
        return;
    };
    if reply.send(value.to_string()).is_err() {
        metrics.record_discarded_reply();
        debug!(%id, "Reply discarded, the sender is gone");
    }
}
