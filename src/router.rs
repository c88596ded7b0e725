//! C5 — the message router and acknowledgement engine.
//!
//! [`dispatch_line`] is the single entry point: every line read off the
//! wire by [`crate::engine::Engine`]'s background task passes through
//! here. Incoming messages are fanned out to matching [`crate::handler`]s
//! and acknowledged exactly once (spec §8 property 2); notifications are
//! fanned out to matching watchers with no acknowledgement; everything
//! else resolves a [`crate::engine`] correlation waiter keyed by
//! [`EventKey`].

use std::sync::Arc;

use crate::{
    engine::Inner,
    handler::HandlerOutcome,
    message::{Message, MessageKind},
    wire::params::ParamMap,
};

/// The correlation key a pending request layer operation is waiting on
/// (design note §9: explicit maps instead of a stringly-typed emitter).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum EventKey {
    /// `_answer,<id>` — a [`crate::engine::Engine::dispatch`] awaiting its
    /// answer.
    Answer(String),
    /// `_install,<name>`.
    Install(String),
    /// `_uninstall,<name>`.
    Uninstall(String),
    /// `_watch,<name>`.
    Watch(String),
    /// `_unwatch,<name>`.
    Unwatch(String),
    /// `_setlocal,<name>`.
    SetLocal(String),
}

/// Parses one inbound line and routes it to the appropriate destination.
#[tracing::instrument(skip(inner))]
pub(crate) async fn dispatch_line(inner: &Arc<Inner>, line: &str) {
    let message = crate::wire::parse_line(line);

    match message.kind {
        MessageKind::Incoming => dispatch_incoming(inner, message).await,
        MessageKind::Notification => dispatch_notification(inner, message).await,
        MessageKind::Answer => {
            let key = EventKey::Answer(message.id.clone());
            resolve(inner, key, message).await;
        }
        MessageKind::Install => {
            let key = EventKey::Install(message.name.clone());
            resolve(inner, key, message).await;
        }
        MessageKind::Uninstall => {
            let key = EventKey::Uninstall(message.name.clone());
            resolve(inner, key, message).await;
        }
        MessageKind::Watch => {
            let key = EventKey::Watch(message.name.clone());
            resolve(inner, key, message).await;
        }
        MessageKind::Unwatch => {
            let key = EventKey::Unwatch(message.name.clone());
            resolve(inner, key, message).await;
        }
        MessageKind::SetLocal => {
            let key = EventKey::SetLocal(message.name.clone());
            resolve(inner, key, message).await;
        }
        MessageKind::Error => {
            tracing::warn!(line = %message.return_value, "engine reported a decoding or protocol error");
            inner.on_error(message.return_value);
        }
        MessageKind::Outgoing => {
            unreachable!("the codec never parses an Outgoing record off the wire")
        }
    }
}

/// Delivers an engine reply to whichever request-layer operation is
/// waiting on `key`, if any (spec §4.3). Discards silently if nothing is
/// waiting — the waiter may already have timed out.
async fn resolve(inner: &Arc<Inner>, key: EventKey, message: Message) {
    if let Some(tx) = inner.correlations.lock().await.remove(&key) {
        let _ = tx.send(message);
    }
}

/// Fans an incoming message out to every matching installed handler,
/// joins their outcomes (bounded by the acknowledge deadline), and
/// acknowledges exactly once (spec §4.3, §8 property 2).
async fn dispatch_incoming(inner: &Arc<Inner>, message: Message) {
    inner.begin_ack(message.id.clone()).await;

    let handlers = inner.registry.lock().await.handlers_matching(&message);

    if handlers.is_empty() {
        ack(inner, &message.id, false, &message.return_value, message.params()).await;
        return;
    }

    let shared = Arc::new(message.clone());
    let mut tasks = tokio::task::JoinSet::new();
    for handler in handlers {
        let shared = shared.clone();
        tasks.spawn(async move { handler.call(&shared).await });
    }

    let mut handled = false;
    let mut mutated: Option<Message> = None;

    let joined = tokio::time::timeout(inner.config.acknowledge_timeout, async {
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => {
                    handled |= outcome.handled();
                    if let HandlerOutcome::Mutated(message) = outcome {
                        mutated = Some(message);
                    }
                }
                Err(err) => tracing::error!(%err, "handler task failed, treating as not handled"),
            }
        }
    })
    .await;

    if joined.is_err() {
        tracing::warn!(
            id = %message.id, name = %message.name,
            "acknowledge deadline elapsed with handlers still pending, acknowledging as received"
        );
        tasks.abort_all();
    }

    let (retvalue, params): (&str, &ParamMap) = match &mutated {
        Some(m) => (&m.return_value, m.params()),
        None => (&message.return_value, message.params()),
    };

    ack(inner, &message.id, handled, retvalue, params).await;
}

/// Fans a notification out to every matching watcher; never acknowledged.
async fn dispatch_notification(inner: &Arc<Inner>, message: Message) {
    let watchers = inner.registry.lock().await.watchers_matching(&message);
    if watchers.is_empty() {
        return;
    }

    let shared = Arc::new(message);
    for watcher in watchers {
        let shared = shared.clone();
        tokio::spawn(async move {
            watcher.call(&shared).await;
        });
    }
}

/// Sends the acknowledgement line for `id`, but only if nobody has
/// already done so (spec §3 invariant (ii): exactly one acknowledgement).
pub(crate) async fn ack(inner: &Arc<Inner>, id: &str, handled: bool, retvalue: &str, params: &ParamMap) {
    if !inner.take_for_ack(id).await {
        return;
    }

    let line = crate::wire::serialize_ack(id, handled, retvalue, params, false);
    if let Err(err) = inner.transport.send_line(line).await {
        tracing::error!(%id, %err, "failed to send acknowledgement");
    }
}
