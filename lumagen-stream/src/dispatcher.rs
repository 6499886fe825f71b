//! Event fan-out
//!
//! The dispatcher delivers every decoded [`Event`] to each subscriber whose
//! predicate accepts it, in publish order. Handlers run inline on the
//! publishing task, so they must be quick; consumers that need to do real
//! work should use [`EventDispatcher::subscribe_channel`] and drain the
//! queue on their own task.
//!
//! A failing or panicking handler is logged and skipped. It never prevents
//! delivery to the remaining subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use lumagen_protocol::Event;

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies one subscription for [`EventDispatcher::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    id: u64,
    predicate: Predicate,
    handler: Handler,
}

#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events matching `predicate`
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> SubscriptionHandle
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        H: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Arc::new(Subscriber {
            id,
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        }));
        SubscriptionHandle(id)
    }

    /// Register a handler for every event
    pub fn subscribe_all<H>(&self, handler: H) -> SubscriptionHandle
    where
        H: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(|_| true, handler)
    }

    /// Queue matching events onto an unbounded channel
    ///
    /// The subscription stays registered until unsubscribed. Once the
    /// receiver is dropped each delivery fails quietly.
    pub fn subscribe_channel<P>(&self, predicate: P) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>)
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(predicate, move |event| {
            tx.send(event.clone()).map_err(|_| "receiver dropped".into())
        });
        (handle, rx)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.0);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every matching subscriber and return how many
    /// handled it successfully
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe
    /// or unsubscribe without deadlocking; such changes apply from the next
    /// event on.
    pub fn publish(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<Subscriber>> = self.subscribers.read().clone();
        let mut delivered = 0;

        for subscriber in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if (subscriber.predicate)(event) {
                    (subscriber.handler)(event).map(|_| true)
                } else {
                    Ok(false)
                }
            }));

            match outcome {
                Ok(Ok(true)) => delivered += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    warn!(subscription = subscriber.id, event = event.name(), error = %e, "event handler failed");
                }
                Err(_) => {
                    error!(subscription = subscriber.id, event = event.name(), "event handler panicked");
                }
            }
        }

        trace!(event = event.name(), delivered, "published event");
        delivered
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
