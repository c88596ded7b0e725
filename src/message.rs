//! The [`Message`] data model (spec §3).
//!
//! A [`Message`] is the single tagged record flowing through every layer of
//! this crate: [`crate::wire`] parses inbound lines into one, the
//! [`crate::router`] correlates and dispatches it, and [`crate::engine::Engine`]
//! builds outgoing ones for [`crate::engine::Engine::dispatch`]/`enqueue`.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use crate::wire::params::ParamMap;

static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a strictly increasing nanosecond counter, unique within this
/// process run (spec §3 invariant (v)).
pub(crate) fn monotonic_nanos() -> u64 {
    let start = START.get_or_init(Instant::now);
    let now = start.elapsed().as_nanos() as u64;

    loop {
        let last = COUNTER.load(Ordering::Relaxed);
        let next = now.max(last + 1);

        if COUNTER
            .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return next;
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs()
}

/// Discriminates the role a [`Message`] plays, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// An engine-originated `%%>message`, awaiting acknowledgement.
    Incoming,
    /// An application-originated `%%>message`, awaiting an answer.
    Outgoing,
    /// An engine-originated `%%<message` with a non-empty id: the answer to
    /// a prior [`MessageKind::Outgoing`] dispatch.
    Answer,
    /// An engine-originated `%%<message` with an empty id: a notification
    /// for a message processed elsewhere.
    Notification,
    /// A `%%<install` reply.
    Install,
    /// A `%%<uninstall` reply.
    Uninstall,
    /// A `%%<watch` reply.
    Watch,
    /// A `%%<unwatch` reply.
    Unwatch,
    /// A `%%<setlocal` reply.
    SetLocal,
    /// An unparseable or unrecognized line (`Error in ...` or malformed).
    Error,
}

/// A message flowing to or from the engine (spec §3).
#[derive(Debug, Clone)]
pub struct Message {
    /// Correlation id. Empty for notifications; always present otherwise.
    pub id: String,
    /// Seconds since the Unix epoch at creation time.
    pub time: u64,
    /// The engine message name (e.g. `call.route`).
    pub name: String,
    /// What role this record plays.
    pub kind: MessageKind,
    /// The free-form return value field.
    pub return_value: String,
    /// Success flag, present on install/uninstall/watch/unwatch/setlocal
    /// replies and on message answers/acknowledgements.
    pub success: Option<bool>,
    /// Handler priority, only meaningful for install-related records.
    pub priority: Option<u32>,
    /// Whether this incoming message has already been acknowledged.
    pub acknowledged: bool,

    params: ParamMap,
}

impl Message {
    /// Builds a fresh outgoing message, with a process-unique id of the
    /// form `<time>.<monotonic-nanos>` (spec §3).
    pub fn outgoing(name: impl Into<String>, return_value: impl Into<String>) -> Self {
        let time = unix_seconds();

        Self {
            id: format!("{time}.{}", monotonic_nanos()),
            time,
            name: name.into(),
            kind: MessageKind::Outgoing,
            return_value: return_value.into(),
            success: None,
            priority: None,
            acknowledged: false,
            params: ParamMap::default(),
        }
    }

    pub(crate) fn new(
        id: impl Into<String>,
        time: u64,
        name: impl Into<String>,
        kind: MessageKind,
        return_value: impl Into<String>,
        params: ParamMap,
    ) -> Self {
        Self {
            id: id.into(),
            time,
            name: name.into(),
            kind,
            return_value: return_value.into(),
            success: None,
            priority: None,
            acknowledged: false,
            params,
        }
    }

    /// A borrowed view of this message's parameter map.
    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    /// A mutable view of this message's parameter map.
    pub fn params_mut(&mut self) -> &mut ParamMap {
        &mut self.params
    }

    /// Replaces the parameter map wholesale, as handlers that return a
    /// mutated message do (spec §4.3).
    pub fn set_params(&mut self, params: ParamMap) {
        self.params = params;
    }

    /// Copies parameters from `other` into `self`.
    ///
    /// `prefix` restricts the copied keys to those starting with it; unless
    /// `keep_prefix` is set, the prefix is stripped from the destination
    /// key. `skip` names keys that are never copied. This resolves the
    /// spec §9/§12 ambiguity in the original `copyParams` in favor of the
    /// implementation that actually honors both arguments.
    pub fn copy_params(&mut self, other: &Message, prefix: Option<&str>, skip: &[&str], keep_prefix: bool) {
        for (key, value) in other.params.iter() {
            if skip.contains(&key) {
                continue;
            }

            let dest = match prefix {
                Some(prefix) if key.starts_with(prefix) => {
                    if keep_prefix {
                        key.to_string()
                    } else {
                        key[prefix.len()..].to_string()
                    }
                }
                Some(_) => continue,
                None => key.to_string(),
            };

            self.params.set(dest, value.to_string());
        }
    }
}
