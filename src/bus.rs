//! Ordered publish/subscribe for session events.
//!
//! # Guarantees
//!
//! - Handlers for an emission run one after another, in subscription order.
//! - `emit` awaits every handler before returning, so each subscriber sees
//!   events in the order they were published.
//! - A handler that returns an error or panics is logged and skipped; the
//!   remaining handlers still run and `emit` never fails.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error};
use tokio::sync::mpsc;

use crate::types::{Event, EventKind};

/// Error a handler may report.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result every handler resolves to.
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

struct Subscription {
    /// `None` listens to every kind.
    kind: Option<EventKind>,
    handler: Handler,
    /// Set for `listen()` streams; the subscription goes once the receiver does.
    listener: Option<mpsc::UnboundedSender<Event>>,
}

impl Subscription {
    fn is_stale(&self) -> bool {
        self.listener.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// Summary of one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOutcome {
    pub kind: EventKind,
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Event bus shared between the session controller and its subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for `kind`.
    ///
    /// The handler runs inside the session's notification flow; it must not
    /// wait for a later event of the same session.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(Some(kind), handler);
    }

    /// Register a plain closure for `kind`.
    pub fn on_sync<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), move |event| {
            handler(event);
            futures::future::ready(Ok::<(), HandlerError>(()))
        });
    }

    /// Register an async handler for every kind.
    pub fn on_any<F, Fut>(&self, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(None, handler);
    }

    /// Stream every event published from now on.
    ///
    /// Dropping the receiver unsubscribes it.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tx.clone();
        let handler: Handler = Arc::new(move |event| {
            let _ = sender.send(event);
            futures::future::ready(Ok::<(), HandlerError>(())).boxed()
        });
        self.push(Subscription {
            kind: None,
            handler,
            listener: Some(tx),
        });
        rx
    }

    /// Number of handlers that would receive `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.read()
            .iter()
            .filter(|s| !s.is_stale() && s.kind.map_or(true, |k| k == kind))
            .count()
    }

    /// Deliver `event` to its handlers and wait for all of them.
    pub async fn emit(&self, event: Event) -> EmitOutcome {
        let kind = event.kind();
        self.prune();
        let handlers: Vec<Handler> = self
            .read()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| s.handler.clone())
            .collect();

        let mut outcome = EmitOutcome {
            kind,
            delivered: 0,
            failed: 0,
        };

        for handler in handlers {
            let event = event.clone();
            let result = AssertUnwindSafe(async move { handler(event).await })
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(err)) => {
                    error!("handler for `{kind}` event failed: {err}");
                    outcome.failed += 1;
                }
                Err(panic) => {
                    error!(
                        "handler for `{kind}` event panicked: {}",
                        panic_message(panic.as_ref())
                    );
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            "emitted `{kind}` to {} handler(s), {} failed",
            outcome.delivered + outcome.failed,
            outcome.failed
        );
        outcome
    }

    fn subscribe<F, Fut>(&self, kind: Option<EventKind>, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| handler(event).boxed());
        self.push(Subscription {
            kind,
            handler,
            listener: None,
        });
    }

    fn push(&self, subscription: Subscription) {
        let mut subscriptions = self.write();
        subscriptions.retain(|s| !s.is_stale());
        subscriptions.push(subscription);
    }

    /// Drop `listen()` streams whose receiver is gone.
    fn prune(&self) {
        if self.read().iter().any(Subscription::is_stale) {
            let mut subscriptions = self.write();
            let before = subscriptions.len();
            subscriptions.retain(|s| !s.is_stale());
            debug!("pruned {} closed listener(s)", before - subscriptions.len());
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.read().len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
