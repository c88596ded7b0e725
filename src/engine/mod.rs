//! C6 — the request layer, and the top-level connector that ties the
//! transport (C3), registry (C4) and router (C5) together.
//!
//! [`Engine`] is a cheaply cloneable handle (an [`Arc`] around shared
//! state) so it can be captured by handler/watcher closures and by
//! [`crate::channel::Channel`] without any lifetime gymnastics — the same
//! shape the teacher's `Engine<I, O>` took with its `Mutex<O>` writer,
//! generalized here to carry the registry, the correlation table and the
//! reconnecting transport behind one shared [`Inner`].

mod config;
pub use config::Config;

mod error;
pub use error::{Error, Result};

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{Mutex, broadcast, oneshot},
};

use crate::{
    handler::{Handler, SharedHandler, SharedWatcher, Watcher},
    message::{Message, MessageKind},
    registry::Registry,
    router::EventKey,
    transport::{BoxRead, BoxWrite, Endpoint, Transport},
    wire,
};

/// The fixed set of local variables read by [`Engine::get_environment`]
/// (spec §4.4).
const ENVIRONMENT_KEYS: [&str; 14] = [
    "version",
    "release",
    "nodename",
    "runid",
    "configname",
    "sharedpath",
    "configpath",
    "cfgsuffix",
    "modulepath",
    "modsuffix",
    "logfile",
    "clientmode",
    "supervised",
    "maxworkers",
];

/// Shared state behind every [`Engine`] clone. Lives for as long as any
/// handle or background task references it.
pub(crate) struct Inner {
    pub(crate) transport: Transport,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) correlations: Mutex<HashMap<EventKey, oneshot::Sender<Message>>>,
    in_flight_acks: Mutex<std::collections::HashSet<String>>,
    pub(crate) config: Config,
    errors: broadcast::Sender<String>,
    shutdown: AtomicBool,
}

impl Inner {
    pub(crate) async fn begin_ack(&self, id: String) {
        self.in_flight_acks.lock().await.insert(id);
    }

    pub(crate) async fn take_for_ack(&self, id: &str) -> bool {
        self.in_flight_acks.lock().await.remove(id)
    }

    pub(crate) fn on_error(&self, line: String) {
        let _ = self.errors.send(line);
    }

    async fn begin_wait(&self, key: EventKey) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.correlations.lock().await.insert(key, tx);
        rx
    }

    async fn cancel_wait(&self, key: &EventKey) {
        self.correlations.lock().await.remove(key);
    }

    /// Writes the registry's setlocal rows, then installs, then watches,
    /// directly to a freshly dialed (not yet [`Transport::install`]ed)
    /// writer — spec §3 invariant (iv): the registry must be re-advertised
    /// before any parked application operation is allowed to flush.
    async fn replay_registry(&self, writer: &mut BoxWrite) -> crate::transport::Result<()> {
        let registry = self.registry.lock().await;

        for (name, value) in registry.setlocal_entries() {
            let line = wire::commands::setlocal(name, Some(value));
            Transport::write_line(writer, &line, self.config.bufsize).await?;
        }

        for (name, priority, filter) in registry.install_entries() {
            let line = wire::commands::install(priority, name, filter.map(|(n, v)| (n, Some(v))));
            Transport::write_line(writer, &line, self.config.bufsize).await?;
        }

        for (name, _filter) in registry.watch_entries() {
            let line = wire::commands::watch(name);
            Transport::write_line(writer, &line, self.config.bufsize).await?;
        }

        Ok(())
    }
}

/// A connector to the telephony engine (spec §2 C5+C6 combined with the
/// top-level connection lifecycle).
///
/// Cloning an [`Engine`] is cheap and shares the same underlying
/// connection, registry and correlation table.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    fn new(endpoint: Endpoint, config: Config) -> Self {
        let transport = Transport::new(
            endpoint,
            config.reconnect,
            config.bufsize,
            config.offline_queue_limit,
        );

        let inner = Arc::new(Inner {
            transport,
            registry: Mutex::new(Registry::default()),
            correlations: Mutex::new(HashMap::new()),
            in_flight_acks: Mutex::new(std::collections::HashSet::new()),
            config,
            errors: broadcast::channel(32).0,
            shutdown: AtomicBool::new(false),
        });

        let engine = Self { inner };
        engine.spawn_run_loop();
        engine.spawn_signal_handler();

        engine
    }

    /// Connects via the process' own stdin/stdout. Reconnect is always
    /// disabled in this mode (spec §4.2).
    pub fn stdio() -> Self {
        Self::new(Endpoint::Local, Config::default())
    }

    /// Connects over TCP to `host:port` (default port 5040).
    pub fn tcp(host: impl Into<String>, port: u16, config: Config) -> Self {
        Self::new(
            Endpoint::Tcp {
                host: host.into(),
                port,
            },
            config,
        )
    }

    /// Connects over a UNIX domain stream socket at `path`.
    pub fn unix(path: impl Into<std::path::PathBuf>, config: Config) -> Self {
        Self::new(Endpoint::Unix { path: path.into() }, config)
    }

    /// This engine's configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The track name this client advertises (spec GLOSSARY).
    pub fn trackname(&self) -> &str {
        &self.inner.config.trackname
    }

    /// A broadcast stream of connection-level error signals: decoding
    /// errors (spec §7 "Decoding error") and, once reconnect is
    /// exhausted, a final "not connected" notice.
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.inner.errors.subscribe()
    }

    fn spawn_run_loop(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move { Self::run_loop(inner).await });
    }

    fn spawn_signal_handler(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("received SIGINT, shutting down gracefully");
                engine.shutdown().await;
            }
        });
    }

    /// Closes the connection, disables reconnect, and lets the last
    /// in-flight writes settle before the process is expected to exit
    /// (spec §6 "Process signals").
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.transport.mark_disconnected().await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    async fn run_loop(inner: Arc<Inner>) {
        loop {
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            match inner.transport.dial().await {
                Ok((reader, mut writer)) => {
                    tracing::debug!("connected to engine");

                    if !inner.transport.is_local() {
                        let line = wire::commands::connect(
                            wire::ConnectRole::Global,
                            Some(&inner.config.trackname),
                            Some("data"),
                        );

                        if let Err(err) = Transport::write_line(&mut writer, &line, inner.config.bufsize).await {
                            tracing::warn!(%err, "failed to send the initial connect line");
                        }
                    }

                    if let Err(err) = inner.replay_registry(&mut writer).await {
                        tracing::warn!(%err, "failed to replay the registry after (re)connect");
                    }

                    if let Err(err) = inner.transport.install(writer).await {
                        tracing::warn!(%err, "failed to drain the offline queue after (re)connect");
                    }

                    Self::read_lines(&inner, reader).await;

                    inner.transport.mark_disconnected().await;
                    tracing::debug!("disconnected from engine");
                }
                Err(err) => tracing::warn!(%err, "failed to dial the engine"),
            }

            if inner.shutdown.load(Ordering::Acquire) || !inner.transport.reconnects() {
                if !inner.transport.reconnects() {
                    inner.on_error("not connected".to_string());
                }
                break;
            }

            tokio::time::sleep(inner.config.reconnect_timeout).await;
        }
    }

    async fn read_lines(inner: &Arc<Inner>, reader: BoxRead) {
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => crate::router::dispatch_line(inner, &line).await,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(%err, "transport read error");
                    break;
                }
            }
        }
    }

    /// Requests the engine to install a message handler (spec §4.4).
    ///
    /// If a handler with the same `(name, filter)` already exists its
    /// handler is replaced in place with no engine round-trip. If
    /// `priority` differs from whatever is currently advertised for
    /// `name`, the engine-side subscription is replaced first
    /// (uninstall-then-install). Resolves `true` without a round-trip if
    /// a handler is already installed for `name` at the same priority.
    pub async fn install<H>(
        &self,
        handler: H,
        name: impl Into<String>,
        priority: u32,
        filter: Option<(String, String)>,
    ) -> Result<bool>
    where
        H: Handler + 'static,
    {
        let name = name.into();
        let handler: SharedHandler = Arc::new(handler);

        let existing_priority = self.inner.registry.lock().await.handler_priority(&name);
        let needs_roundtrip = existing_priority != Some(priority);

        if needs_roundtrip {
            if existing_priority.is_some() {
                self.wire_uninstall(&name).await;
            }

            if !self.wire_install(&name, priority, filter.as_ref()).await? {
                return Ok(false);
            }
        }

        self.inner
            .registry
            .lock()
            .await
            .set_handler(&name, priority, filter, handler)?;

        Ok(true)
    }

    async fn wire_install(&self, name: &str, priority: u32, filter: Option<&(String, String)>) -> Result<bool> {
        let key = EventKey::Install(name.to_string());
        let rx = self.inner.begin_wait(key.clone()).await;

        let line = wire::commands::install(priority, name, filter.map(|(n, v)| (n.as_str(), Some(v.as_str()))));
        self.inner.transport.send_line(line).await?;

        match tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.success.unwrap_or(false)),
            _ => {
                self.inner.cancel_wait(&key).await;
                Ok(false)
            }
        }
    }

    async fn wire_uninstall(&self, name: &str) {
        let key = EventKey::Uninstall(name.to_string());
        let rx = self.inner.begin_wait(key.clone()).await;

        if self.inner.transport.send_line(wire::commands::uninstall(name)).await.is_ok() {
            let _ = tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await;
        }

        self.inner.cancel_wait(&key).await;
    }

    /// Requests the engine to remove a previously installed handler (spec
    /// §4.4). Simplified from the source's five call shapes to the two
    /// that matter in a typed language: by name, and by name+filter (see
    /// DESIGN.md).
    pub async fn uninstall(&self, name: impl Into<String>, filter: Option<(&str, &str)>) -> Result<bool> {
        let name = name.into();
        let remaining = self.inner.registry.lock().await.unset_handler(&name, filter);

        if remaining {
            return Ok(false);
        }

        let key = EventKey::Uninstall(name.clone());
        let rx = self.inner.begin_wait(key.clone()).await;
        self.inner.transport.send_line(wire::commands::uninstall(&name)).await?;

        match tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.success.unwrap_or(false)),
            _ => {
                self.inner.cancel_wait(&key).await;
                Ok(false)
            }
        }
    }

    /// Requests the engine to install a message watcher (spec §4.4).
    pub async fn watch<W>(&self, watcher: W, name: impl Into<String>, filter: Option<(String, String)>) -> Result<bool>
    where
        W: Watcher + 'static,
    {
        let name = name.into();
        let watcher: SharedWatcher = Arc::new(watcher);
        let already_watched = self.inner.registry.lock().await.has_watchers(&name);

        if !already_watched {
            let key = EventKey::Watch(name.clone());
            let rx = self.inner.begin_wait(key.clone()).await;
            self.inner.transport.send_line(wire::commands::watch(&name)).await?;

            let success = match tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await {
                Ok(Ok(reply)) => reply.success.unwrap_or(false),
                _ => {
                    self.inner.cancel_wait(&key).await;
                    false
                }
            };

            if !success {
                return Ok(false);
            }
        }

        self.inner.registry.lock().await.set_watcher(&name, filter, watcher)?;
        Ok(true)
    }

    /// Requests the engine to remove a previously installed watcher.
    pub async fn unwatch(&self, name: impl Into<String>, filter: Option<(&str, &str)>) -> Result<bool> {
        let name = name.into();
        let remaining = self.inner.registry.lock().await.unset_watcher(&name, filter);

        if remaining {
            return Ok(false);
        }

        let key = EventKey::Unwatch(name.clone());
        let rx = self.inner.begin_wait(key.clone()).await;
        self.inner.transport.send_line(wire::commands::unwatch(&name)).await?;

        match tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.success.unwrap_or(false)),
            _ => {
                self.inner.cancel_wait(&key).await;
                Ok(false)
            }
        }
    }

    /// Installs a one-shot watcher on `name`/`filter`, resolving with the
    /// first matching notification and automatically unwatching itself
    /// afterwards. Used internally by [`crate::channel::Channel`] to wait
    /// for `call.execute`/`chan.notify` without leaking a long-lived
    /// subscription.
    pub(crate) async fn watch_once(
        &self,
        name: impl Into<String>,
        filter: Option<(String, String)>,
    ) -> Result<oneshot::Receiver<Message>> {
        let name = name.into();
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(std::sync::Mutex::new(Some(tx)));

        let engine = self.clone();
        let unwatch_name = name.clone();
        let unwatch_filter = filter.clone();

        let watcher = move |message: &Message| {
            let slot = slot.clone();
            let message = message.clone();
            let engine = engine.clone();
            let unwatch_name = unwatch_name.clone();
            let unwatch_filter = unwatch_filter.clone();

            async move {
                let sent = slot.lock().unwrap().take();
                if let Some(sender) = sent {
                    let _ = sender.send(message);
                    let filter = unwatch_filter.as_ref().map(|(n, v)| (n.as_str(), v.as_str()));
                    let _ = engine.unwatch(unwatch_name, filter).await;
                }
            }
        };

        self.watch(watcher, name, filter).await?;
        Ok(rx)
    }

    /// Sets (or reads, if `value` is `None`) a local variable (spec
    /// §4.4). Resolves with the engine-reported string on success, `None`
    /// on a negative reply or timeout.
    pub async fn setlocal(&self, name: impl Into<String>, value: Option<String>) -> Result<Option<String>> {
        let name = name.into();
        let key = EventKey::SetLocal(name.clone());
        let rx = self.inner.begin_wait(key.clone()).await;

        let line = wire::commands::setlocal(&name, value.as_deref());
        self.inner.transport.send_line(line).await?;

        match tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await {
            Ok(Ok(reply)) if reply.success == Some(true) => {
                if !reply.return_value.is_empty() {
                    self.inner.registry.lock().await.set_setlocal(&name, &reply.return_value);
                }

                Ok(Some(reply.return_value))
            }
            Ok(Ok(_)) => Ok(None),
            _ => {
                self.inner.cancel_wait(&key).await;
                Ok(None)
            }
        }
    }

    /// Reads the current value of a local variable; shorthand for
    /// `setlocal(name, None)`.
    pub async fn getlocal(&self, name: impl Into<String>) -> Result<Option<String>> {
        self.setlocal(name, None).await
    }

    /// Dispatches an outgoing message and awaits its answer (spec §4.4).
    /// On timeout, resolves with the original message, `success =
    /// Some(false)` — failures here are local-first (spec §7).
    pub async fn dispatch(&self, mut message: Message) -> Result<Message> {
        debug_assert!(matches!(message.kind, MessageKind::Outgoing));

        let key = EventKey::Answer(message.id.clone());
        let rx = self.inner.begin_wait(key.clone()).await;

        let line = wire::serialize_outgoing(&message, false);
        self.inner.transport.send_line(line).await?;

        match tokio::time::timeout(self.inner.config.dispatch_timeout, rx).await {
            Ok(Ok(reply)) => {
                message.success = reply.success;
                message.return_value = reply.return_value;
                message.set_params(reply.params().clone());

                Ok(message)
            }
            _ => {
                self.inner.cancel_wait(&key).await;
                message.success = Some(false);

                Ok(message)
            }
        }
    }

    /// Enqueues an outgoing message without waiting for an answer (spec
    /// §4.4). Parked on the offline queue if disconnected, like every
    /// other outbound operation.
    pub async fn enqueue(&self, message: &Message) -> Result<()> {
        debug_assert!(matches!(message.kind, MessageKind::Outgoing));

        let line = wire::serialize_outgoing(message, false);
        self.inner.transport.send_line(line).await.map_err(Into::into)
    }

    /// Explicitly, and early, acknowledges an incoming message (spec
    /// §4.4). A no-op if the router already sent the (only) allowed
    /// acknowledgement for this id.
    pub async fn acknowledge(&self, message: &Message, handled: bool) -> Result<()> {
        crate::router::ack(&self.inner, &message.id, handled, &message.return_value, message.params()).await;
        Ok(())
    }

    /// Forwards `text` to the engine's own log, one `%%>output:` line per
    /// `\n`-separated line (spec §4.4).
    pub async fn output(&self, text: impl AsRef<str>) -> Result<()> {
        for line in text.as_ref().split('\n') {
            self.inner.transport.send_line(wire::commands::output(line)).await?;
        }

        Ok(())
    }

    /// Reads the fixed set of environment variables named in spec §4.4 in
    /// parallel, via [`Self::getlocal`].
    pub async fn get_environment(&self) -> Result<HashMap<String, String>> {
        let mut tasks = tokio::task::JoinSet::new();
        for key in ENVIRONMENT_KEYS {
            let engine = self.clone();
            tasks.spawn(async move { (key, engine.getlocal(key).await) });
        }

        let mut environment = HashMap::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok((key, Ok(Some(value)))) = result {
                environment.insert(key.to_string(), value);
            }
        }

        Ok(environment)
    }

    /// Builds a [`crate::channel::Channel`] from a seed `call.route` or
    /// `call.execute` message (spec §4.5).
    pub async fn channel_from(&self, seed: &Message) -> Result<crate::channel::Channel> {
        crate::channel::Channel::new(self.clone(), seed).await
    }

    /// Channel-mode: installs a one-shot, priority-0 `call.execute`
    /// handler to capture the engine-originated call on this process'
    /// own stdio connection, then builds a [`crate::channel::Channel`]
    /// that exits the process shortly after hangup (spec §4.5
    /// "Channel-mode alternative").
    pub async fn to_channel(&self) -> Result<crate::channel::Channel> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(std::sync::Mutex::new(Some(tx)));

        let handler = move |message: &Message| {
            let slot = slot.clone();
            let message = message.clone();

            async move {
                if let Some(sender) = slot.lock().unwrap().take() {
                    let _ = sender.send(message);
                }

                crate::handler::HandlerOutcome::Handled(true)
            }
        };

        self.install(handler, "call.execute", 0, None).await?;

        let seed = rx.await.map_err(|_| Error::UnexpectedEof)?;
        let channel = crate::channel::Channel::new(self.clone(), &seed).await?;
        channel.enable_channel_mode();

        Ok(channel)
    }

    pub(crate) async fn remove_filtered(&self, filter_name: &str, filter_value: &str) {
        self.inner.registry.lock().await.remove_filtered(filter_name, filter_value);
    }
}
