//! Connection state notifications.
//!
//! Handlers are awaited one after another, in subscription order, on the
//! task that detected the transition. No lock is held while they run, so a
//! handler may call back into the manager (including stopping reconnection).
//! The same events are also fanned out on a broadcast channel for consumers
//! that prefer a stream.
//!
//! Events are delivered in the order their [`EmitTicket`]s were reserved, not
//! the order emitting tasks happen to reach the dispatcher. The controller
//! reserves a ticket while it still holds its state lock, so subscribers see
//! transitions in the order they happened. An event emitted from inside a
//! handler is delivered inline. A handler must not wait for a later event.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection established and every registered resource rebound.
    Connected,
    /// Live connection lost.
    Disconnected,
    /// A reconnect attempt is starting. `max_attempts == 0` means unbounded.
    ReconnectionAttempt { attempt: u32, max_attempts: u32 },
    /// Reconnect cycle gave up.
    ReconnectionFailed { total_attempts: u32 },
}

/// Handler for connection events.
pub trait ConnectionEventHandler: Send + Sync {
    fn handle(&self, event: ConnectionEvent) -> BoxFuture<'static, ()>;
}

impl<F, Fut> ConnectionEventHandler for F
where
    F: Fn(ConnectionEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, event: ConnectionEvent) -> BoxFuture<'static, ()> {
        Box::pin(self(event))
    }
}

/// Identifies a subscribed handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

tokio::task_local! {
    /// Set while the current task is running event handlers.
    static DELIVERING: ();
}

#[derive(Debug, Default)]
struct DeliveryOrder {
    /// Lowest ticket not yet delivered.
    next: u64,
    /// Tickets finished ahead of `next`.
    finished: BTreeSet<u64>,
}

impl DeliveryOrder {
    fn finish(&mut self, seq: u64) {
        self.finished.insert(seq);
        while self.finished.remove(&self.next) {
            self.next += 1;
        }
    }
}

/// A reserved place in the event order.
///
/// Dropping a ticket without delivering it releases its place.
pub struct EmitTicket {
    seq: u64,
    order: Arc<watch::Sender<DeliveryOrder>>,
}

impl Drop for EmitTicket {
    fn drop(&mut self) {
        let seq = self.seq;
        self.order.send_modify(|order| order.finish(seq));
    }
}

/// Multi-subscriber event dispatcher.
pub struct EventDispatcher {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn ConnectionEventHandler>)>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<ConnectionEvent>,
    issued: AtomicU64,
    order: Arc<watch::Sender<DeliveryOrder>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
            issued: AtomicU64::new(0),
            order: Arc::new(watch::channel(DeliveryOrder::default()).0),
        }
    }

    pub async fn subscribe(&self, handler: Arc<dyn ConnectionEventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().await;
        handlers.push((id, handler));
        debug!(handler_count = handlers.len(), "Connection event handler subscribed");
        id
    }

    /// Returns false if the id was not subscribed.
    pub async fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Receiver for every event emitted from now on.
    pub fn stream(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.stream.subscribe()
    }

    /// Reserve the next place in the event order.
    pub fn reserve(&self) -> EmitTicket {
        EmitTicket {
            seq: self.issued.fetch_add(1, Ordering::SeqCst),
            order: self.order.clone(),
        }
    }

    /// Reserve and deliver in one step.
    pub async fn emit(&self, event: ConnectionEvent) {
        self.deliver(self.reserve(), event).await;
    }

    /// Deliver an event to every handler, then to stream receivers, once
    /// every earlier ticket has been delivered or dropped.
    pub async fn deliver(&self, ticket: EmitTicket, event: ConnectionEvent) {
        if DELIVERING.try_with(|_| ()).is_err() {
            let mut turn = self.order.subscribe();
            // The sender lives as long as `self`
            let _ = turn.wait_for(|order| order.next >= ticket.seq).await;
        }

        let handlers: Vec<Arc<dyn ConnectionEventHandler>> = self
            .handlers
            .read()
            .await
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        debug!(?event, handlers = handlers.len(), "Emitting connection event");
        DELIVERING
            .scope((), async {
                for handler in handlers {
                    handler.handle(event).await;
                }
            })
            .await;
        // No receivers is fine
        let _ = self.stream.send(event);
        drop(ticket);
    }
}
