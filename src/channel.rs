//! The per-call state machine layered on top of the request layer.
//!
//! A [`Channel`] is a cheaply cloneable handle (an [`Arc`] around shared
//! state), the same shape as [`crate::engine::Engine`] itself, so that its
//! long-lived `chan.notify`/`chan.hangup` teardown watchers can hold a
//! clone instead of borrowing `self` for a lifetime they can't express.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Notify, RwLock};

use crate::{
    engine::{Engine, Error, Result},
    message::Message,
    wire::params::ParamMap,
};

/// The call-leg lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not yet answered, no far-end party attached.
    Incoming,
    /// Ringing, or dialed out and awaiting answer.
    Ringing,
    /// Answered.
    Answered,
    /// Torn down by us.
    Dropped,
    /// Torn down by the engine (`chan.hangup` observed).
    Hangup,
}

/// A cancellation signal shared by every in-flight operation on one
/// channel.
#[derive(Clone)]
struct Reset(Arc<Notify>);

impl Reset {
    fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    fn fire(&self) {
        self.0.notify_waiters();
    }

    /// Races `fut` against this reset signal. `Err(())` means reset fired
    /// first.
    async fn guard<F: std::future::Future>(&self, fut: F) -> std::result::Result<F::Output, ()> {
        tokio::select! {
            output = fut => Ok(output),
            _ = self.0.notified() => Err(()),
        }
    }
}

struct Inner {
    engine: Engine,
    id: RwLock<Option<String>>,
    peerid: RwLock<String>,
    status: RwLock<Status>,
    ready: AtomicBool,
    channel_mode: AtomicBool,
    reset: Reset,
    hangup: Arc<Notify>,
}

/// One call leg. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Channel(Arc<Inner>);

impl Channel {
    /// Builds a channel from a seed `call.route` or `call.execute`
    /// message, and installs the long-lived teardown watchers.
    pub(crate) async fn new(engine: Engine, seed: &Message) -> Result<Self> {
        let id = seed.id.clone();
        let peerid = seed
            .params()
            .get("peerid")
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());

        let is_call_execute = seed.name == "call.execute";
        // A `call.execute` seed is already the definitive event — whether it
        // arrived as a direct `%%>message` or (channel-mode) was captured by
        // a one-shot handler, no further wait is needed. A `call.route` seed
        // still needs `init()` to watch for the matching `call.execute`.
        let ready = is_call_execute;
        let status = if is_call_execute { Status::Ringing } else { Status::Incoming };

        let channel = Self(Arc::new(Inner {
            engine,
            id: RwLock::new(Some(id)),
            peerid: RwLock::new(peerid),
            status: RwLock::new(status),
            ready: AtomicBool::new(ready),
            channel_mode: AtomicBool::new(false),
            reset: Reset::new(),
            hangup: Arc::new(Notify::new()),
        }));

        channel.install_teardown_watchers().await?;
        Ok(channel)
    }

    fn engine(&self) -> &Engine {
        &self.0.engine
    }

    async fn install_teardown_watchers(&self) -> Result<()> {
        let Some(id) = self.0.id.read().await.clone() else {
            return Ok(());
        };
        let filter_value = regex::escape(&id);

        // Keeps any per-channel subscriptions alive until hangup — a
        // no-op observer is enough, its only job is to hold the watch
        // open.
        self.engine()
            .watch(
                |_message: &Message| async {},
                "chan.notify",
                Some(("id".to_string(), filter_value.clone())),
            )
            .await?;

        let teardown = self.clone();
        let teardown_filter_value = filter_value.clone();

        self.engine()
            .watch(
                move |_message: &Message| {
                    let teardown = teardown.clone();
                    let teardown_filter_value = teardown_filter_value.clone();

                    async move {
                        teardown.0.ready.store(false, Ordering::Release);
                        *teardown.0.status.write().await = Status::Hangup;
                        teardown.0.hangup.notify_waiters();
                        // `remove_filtered` compares stored filter values by
                        // exact string equality (registry.rs), so this must
                        // be the same escaped form the watches above were
                        // installed with, not the raw id.
                        teardown.engine().remove_filtered("id", &teardown_filter_value).await;
                    }
                },
                "chan.hangup",
                Some(("id".to_string(), filter_value)),
            )
            .await?;

        Ok(())
    }

    /// This channel's own id, if known.
    pub async fn id(&self) -> Option<String> {
        self.0.id.read().await.clone()
    }

    /// The id of the party currently attached to this channel.
    pub async fn peerid(&self) -> String {
        self.0.peerid.read().await.clone()
    }

    /// The current lifecycle status.
    pub async fn status(&self) -> Status {
        *self.0.status.read().await
    }

    /// Whether [`Self::init`] has resolved.
    pub fn ready(&self) -> bool {
        self.0.ready.load(Ordering::Acquire)
    }

    /// Fires the per-channel reset signal: every suspended operation on
    /// this channel rejects with [`Error::Reset`].
    pub fn reset(&self) {
        self.0.reset.fire();
    }

    pub(crate) fn enable_channel_mode(&self) {
        self.0.channel_mode.store(true, Ordering::Release);
        self.spawn_process_exit_on_hangup();
    }

    fn spawn_process_exit_on_hangup(&self) {
        let hangup = self.0.hangup.clone();
        tokio::spawn(async move {
            hangup.notified().await;
            tracing::info!("channel hung up in channel-mode, exiting shortly");
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::process::exit(0);
        });
    }

    /// Resolves once the call leg is attached: immediately if the seed
    /// was a notification-form `call.execute`, otherwise after a matching
    /// `call.execute` for this id arrives.
    pub async fn init(&self) -> Result<()> {
        if self.0.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let peerid = self.0.peerid.read().await.clone();
        let rx = self
            .engine()
            .watch_once("call.execute", Some(("id".to_string(), regex::escape(&peerid))))
            .await?;

        match self.0.reset.guard(rx).await {
            Ok(Ok(message)) => {
                *self.0.peerid.write().await = message.id.clone();
                *self.0.status.write().await = Status::Ringing;
                self.0.ready.store(true, Ordering::Release);
                Ok(())
            }
            Ok(Err(_)) => Err(Error::UnexpectedEof),
            Err(()) => Err(Error::Reset),
        }
    }

    fn dtmf_timeout(dst: &str, override_ms: Option<u64>) -> Duration {
        if let Some(ms) = override_ms {
            return Duration::from_millis(ms);
        }

        if let Some(digits) = dst.strip_prefix("tone/dtmfstr/") {
            Duration::from_millis(250 * digits.chars().count().max(1) as u64)
        } else {
            Duration::from_millis(250)
        }
    }

    /// Media attach. Dispatches a `chan.masquerade` wrapping
    /// `chan.attach`, following one of three target families: DTMF tone
    /// injection, recording, or generic source/consumer attach.
    pub async fn call_to(&self, dst: impl Into<String>, params: ParamMap) -> Result<Message> {
        let dst = dst.into();
        let peerid = self.0.peerid.read().await.clone();
        let trackname = self.engine().trackname().to_string();
        let targetid = format!("{trackname}-notify/{}", crate::message::monotonic_nanos());

        let mut inner = ParamMap::default();
        inner.set("message", "chan.attach");

        let is_dtmf = dst.starts_with("tone/dtmf");

        if is_dtmf {
            let primary = self.0.id.read().await.clone().unwrap_or_else(|| peerid.clone());
            inner.set("id", primary);
            inner.set("override", dst.clone());
        } else if dst.starts_with("wave/record") {
            inner.set("id", peerid.clone());
            inner.set("source", "wave/play/-");
            inner.set("consumer", dst.clone());

            let maxlen = params.get("maxlen").map(str::to_string).unwrap_or_else(|| "180000".to_string());
            inner.set("maxlen", maxlen);
        } else {
            inner.set("id", peerid.clone());
            inner.set("source", dst.clone());
            inner.set("consumer", "wave/record/-");
        }

        if !is_dtmf {
            inner.set("notify", targetid.clone());
        }

        for (key, value) in params.iter() {
            if key != "timeout" && key != "maxlen" {
                inner.set(key.to_string(), value.to_string());
            }
        }

        let mut masquerade = Message::outgoing("chan.masquerade", "");
        masquerade.set_params(inner);

        let override_timeout = params.get("timeout").and_then(|v| v.parse::<u64>().ok());

        if is_dtmf {
            let wait = Self::dtmf_timeout(&dst, override_timeout);

            self.0
                .reset
                .guard(self.engine().dispatch(masquerade))
                .await
                .map_err(|()| Error::Reset)??;

            self.0.reset.guard(tokio::time::sleep(wait)).await.map_err(|()| Error::Reset)?;

            let mut notification = Message::outgoing("chan.notify", "");
            notification.params_mut().set("targetid", targetid);
            notification.params_mut().set("reason", "eof");
            return Ok(notification);
        }

        let rx = self
            .engine()
            .watch_once("chan.notify", Some(("targetid".to_string(), regex::escape(&targetid))))
            .await?;

        self.0
            .reset
            .guard(self.engine().dispatch(masquerade))
            .await
            .map_err(|()| Error::Reset)??;

        let fallback = override_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.engine().config().call_timeout);

        match self.0.reset.guard(tokio::time::timeout(fallback, rx)).await {
            Err(()) => Err(Error::Reset),
            Ok(Err(_elapsed)) => {
                let mut notification = Message::outgoing("chan.notify", "");
                notification.params_mut().set("targetid", targetid);
                notification.params_mut().set("reason", "eof");
                Ok(notification)
            }
            Ok(Ok(Ok(message))) => Ok(message),
            Ok(Ok(Err(_))) => Err(Error::UnexpectedEof),
        }
    }

    /// Redirect. Dispatches a `chan.masquerade` wrapping `call.execute`
    /// with `callto=dst`, then updates `peerid`/`status` from the answer.
    pub async fn call_just(&self, dst: impl Into<String>, params: ParamMap) -> Result<()> {
        let peerid = self.0.peerid.read().await.clone();

        let mut inner = ParamMap::default();
        inner.set("message", "call.execute");
        inner.set("id", peerid);
        inner.set("callto", dst.into());
        for (key, value) in params.iter() {
            inner.set(key.to_string(), value.to_string());
        }

        let mut masquerade = Message::outgoing("chan.masquerade", "");
        masquerade.set_params(inner);

        let answer = self
            .0
            .reset
            .guard(self.engine().dispatch(masquerade))
            .await
            .map_err(|()| Error::Reset)??;

        if let Some(id) = answer.params().get("id") {
            *self.0.peerid.write().await = id.to_string();
        }

        let current = *self.0.status.read().await;
        let next = if answer.success == Some(true) { Status::Ringing } else { current };
        *self.0.status.write().await = next;

        if self.0.channel_mode.load(Ordering::Acquire) && answer.success == Some(true) {
            self.0.hangup.notify_waiters();
        }

        Ok(())
    }

    async fn masquerade_call_state(&self, message_name: &str, params: ParamMap) -> Result<()> {
        let peerid = self.0.peerid.read().await.clone();

        let mut inner = ParamMap::default();
        inner.set("message", message_name.to_string());
        inner.set("id", peerid);
        for (key, value) in params.iter() {
            inner.set(key.to_string(), value.to_string());
        }

        let mut masquerade = Message::outgoing("chan.masquerade", "");
        masquerade.set_params(inner);
        self.engine().enqueue(&masquerade).await?;

        Ok(())
    }

    /// Dispatches `call.ringing`; sets status to ringing unless already
    /// answered.
    pub async fn ringing(&self, params: ParamMap) -> Result<()> {
        self.masquerade_call_state("call.ringing", params).await?;

        let mut status = self.0.status.write().await;
        if *status != Status::Answered {
            *status = Status::Ringing;
        }

        Ok(())
    }

    /// Dispatches `call.progress`; sets status to ringing unless already
    /// answered.
    pub async fn progress(&self, params: ParamMap) -> Result<()> {
        self.masquerade_call_state("call.progress", params).await?;

        let mut status = self.0.status.write().await;
        if *status != Status::Answered {
            *status = Status::Ringing;
        }

        Ok(())
    }

    /// Dispatches `call.answered`; forces status to answered.
    pub async fn answered(&self, params: ParamMap) -> Result<()> {
        self.masquerade_call_state("call.answered", params).await?;
        *self.0.status.write().await = Status::Answered;

        Ok(())
    }

    /// Dispatches `call.drop` with `id=channel.id`; sets status to
    /// dropped.
    pub async fn hangup(&self, reason: Option<&str>) -> Result<()> {
        let id = self.0.id.read().await.clone().unwrap_or_default();

        let mut message = Message::outgoing("call.drop", "");
        message.params_mut().set("id", id);
        if let Some(reason) = reason {
            message.params_mut().set("reason", reason.to_string());
        }

        self.engine().enqueue(&message).await?;
        *self.0.status.write().await = Status::Dropped;

        if self.0.channel_mode.load(Ordering::Acquire) {
            self.0.hangup.notify_waiters();
        }

        Ok(())
    }
}
