//! Handler polymorphism (spec §4.3, design note §9).
//!
//! The original system lets a handler return a bool, a (possibly mutated)
//! message, nothing, or a future of any of those. We reify that as one
//! tagged [`HandlerOutcome`] and a single async [`Handler`] trait; callers
//! that only ever return a bool or nothing can still implement it trivially
//! with a closure via the blanket impl below.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::message::Message;

/// The result of running a handler against one incoming message.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// The handler ran and reports whether it considers the message
    /// handled; parameters are unchanged.
    Handled(bool),
    /// The handler mutated the message; its parameters replace the
    /// original for the purposes of acknowledgement, and it counts as
    /// handled.
    Mutated(Message),
    /// The handler declines to report anything: acknowledge unchanged,
    /// not handled.
    Ignored,
}

impl HandlerOutcome {
    pub(crate) fn handled(&self) -> bool {
        matches!(self, Self::Handled(true) | Self::Mutated(_))
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message handler installed for a given name (and optional filter).
///
/// Handlers failing with a panic are caught by the router (spec §7:
/// "Handler failure: logged ... treated as not handled") and never unwind
/// past [`crate::router::Router::dispatch_incoming`].
pub trait Handler: Send + Sync {
    /// Process one incoming message, producing a [`HandlerOutcome`].
    fn call<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, HandlerOutcome>;
}

impl<F, Fut> Handler for F
where
    F: Fn(&Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn call<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, HandlerOutcome> {
        Box::pin(self(message))
    }
}

/// A shared, clonable handle to an installed [`Handler`].
pub type SharedHandler = Arc<dyn Handler>;

/// A watcher installed for a given name (and optional filter); unlike
/// [`Handler`], its outcome is never acknowledged to the engine.
pub trait Watcher: Send + Sync {
    /// Observe one notification.
    fn call<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, ()>;
}

impl<F, Fut> Watcher for F
where
    F: Fn(&Message) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, ()> {
        Box::pin(self(message))
    }
}

/// A shared, clonable handle to an installed [`Watcher`].
pub type SharedWatcher = Arc<dyn Watcher>;
