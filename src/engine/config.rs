//! Every configuration knob an [`super::Engine`] needs, with its documented
//! default.

use std::time::Duration;

/// Construction-time configuration for an [`super::Engine`].
///
/// `Config::default()` yields sensible defaults for a socket-connected
/// engine. Loading this from a configuration file is left to the
/// embedding application, which builds one with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tag identifying this client in engine logs and handler attribution.
    /// Default `"next-yate"`.
    pub trackname: String,
    /// Whether to reconnect after a disconnect in socket mode. Always
    /// inert for [`crate::transport::Endpoint::Local`]. Default `true`.
    pub reconnect: bool,
    /// Delay between a disconnect and the next dial attempt. Default 10s.
    pub reconnect_timeout: Duration,
    /// Deadline for a [`super::Engine::dispatch`] awaiting its answer.
    /// Default 10s.
    pub dispatch_timeout: Duration,
    /// Deadline by which an incoming message's handlers must resolve
    /// before it is acknowledged as received regardless. Default 10s.
    pub acknowledge_timeout: Duration,
    /// Maximum outbound line length before truncation. Default 8192.
    pub bufsize: usize,
    /// Maximum number of lines parked while disconnected before
    /// [`crate::transport::Error::QueueFull`]. Default 100.
    pub offline_queue_limit: usize,
    /// Fallback timeout for a [`crate::channel::Channel::call_to`] that
    /// never receives a matching `chan.notify`. Default 3,600,000 ms.
    pub call_timeout: Duration,
    /// Operate as a single synthetic channel attached via the process'
    /// own stdio, exiting once it hangs up. Default `false`.
    pub channel_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trackname: "next-yate".to_string(),
            reconnect: true,
            reconnect_timeout: Duration::from_secs(10),
            dispatch_timeout: Duration::from_secs(10),
            acknowledge_timeout: Duration::from_secs(10),
            bufsize: 8192,
            offline_queue_limit: 100,
            call_timeout: Duration::from_millis(3_600_000),
            channel_mode: false,
        }
    }
}

impl Config {
    /// Overrides the track name.
    pub fn with_trackname(mut self, trackname: impl Into<String>) -> Self {
        self.trackname = trackname.into();
        self
    }

    /// Overrides whether reconnect is attempted.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Overrides the reconnect delay.
    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Overrides the dispatch (answer) deadline.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Overrides the acknowledge deadline.
    pub fn with_acknowledge_timeout(mut self, timeout: Duration) -> Self {
        self.acknowledge_timeout = timeout;
        self
    }

    /// Overrides the maximum outbound line length.
    pub fn with_bufsize(mut self, bufsize: usize) -> Self {
        self.bufsize = bufsize;
        self
    }

    /// Overrides the offline queue bound.
    pub fn with_offline_queue_limit(mut self, limit: usize) -> Self {
        self.offline_queue_limit = limit;
        self
    }

    /// Overrides the default `callTo` fallback timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Enables channel-mode.
    pub fn with_channel_mode(mut self, channel_mode: bool) -> Self {
        self.channel_mode = channel_mode;
        self
    }
}
