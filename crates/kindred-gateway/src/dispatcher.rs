use std::sync::Arc;

use tokio::sync::broadcast;

use kindred_types::events::GatewayEvent;

/// Publishes events to every connected client. Pure fan-out: no business
/// logic, no delivery guarantee beyond best-effort. Clients that need
/// history fetch it over REST. Scoping to a discussion happens per
/// connection against its subscribed set, keyed by
/// `GatewayEvent::discussion_id()`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Dropped silently when
    /// nobody is listening.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
