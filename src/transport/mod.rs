//! C3 — the transport: stdin/stdout or a stream socket, line-based
//! reading, a single-writer outbound serializer, and the offline queue
//! that backs reconnect (spec §4.2).
//!
//! [`Transport`] owns the one truly shared mutable resource named in spec
//! §5 ("the outbound stream is the one critical serialized resource"). It
//! knows nothing about the wire format, the registry, or reconnect
//! *policy* — [`crate::engine::Engine`] drives the dial/replay/drain
//! sequence and owns what happens when the socket drops. This keeps the
//! truncation/queueing rules in one small, independently testable place.

mod error;
pub use error::{Error, Result};

use std::{collections::VecDeque, path::PathBuf, pin::Pin};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, UnixStream},
    sync::{Mutex, Notify},
};

/// A boxed, owned half of whatever socket or pipe we're reading from.
pub type BoxRead = Pin<Box<dyn AsyncRead + Send>>;
/// A boxed, owned half of whatever socket or pipe we're writing to.
pub type BoxWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// How to reach the engine (spec §4.2/§6).
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// stdin/stdout. Reconnect is never attempted in this mode, per spec
    /// §4.2 "Local: ... reconnect disabled".
    Local,
    /// A TCP connection to `host:port` (default port 5040).
    Tcp {
        /// Hostname or address to dial.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// A UNIX domain stream socket at `path`.
    Unix {
        /// Filesystem path of the socket.
        path: PathBuf,
    },
}

impl Endpoint {
    /// True for [`Endpoint::Local`].
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    async fn dial(&self) -> Result<(BoxRead, BoxWrite)> {
        match self {
            Self::Local => Ok((
                Box::pin(tokio::io::stdin()) as BoxRead,
                Box::pin(tokio::io::stdout()) as BoxWrite,
            )),
            Self::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                let (rd, wr) = stream.into_split();
                Ok((Box::pin(rd), Box::pin(wr)))
            }
            Self::Unix { path } => {
                let stream = UnixStream::connect(path).await?;
                let (rd, wr) = stream.into_split();
                Ok((Box::pin(rd), Box::pin(wr)))
            }
        }
    }
}

/// Truncates `line` to at most `max_len` bytes, stepping back to the
/// nearest char boundary so valid UTF-8 (e.g. an unescaped non-ASCII
/// parameter value) never panics `String::truncate` by landing inside a
/// multi-byte codepoint.
fn truncate_to_bufsize(line: &mut String, max_len: usize) {
    if line.len() <= max_len {
        return;
    }

    let mut end = max_len;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }

    line.truncate(end);
}

struct State {
    writer: Option<BoxWrite>,
    /// Lines parked while disconnected, oldest first (spec §3 invariant
    /// iii). Only ever non-empty between [`Transport::mark_disconnected`]
    /// and the next successful [`Transport::install`].
    queue: VecDeque<String>,
}

/// The line-oriented transport: dials the [`Endpoint`], serializes writes
/// through a single critical section, and parks outbound lines while
/// disconnected.
pub struct Transport {
    endpoint: Endpoint,
    reconnect: bool,
    bufsize: usize,
    queue_limit: usize,

    state: Mutex<State>,
    /// Fires every time a writer is installed, for callers that want to
    /// wait out a disconnect rather than park (none currently do, but it
    /// keeps the connect/disconnect edge observable for tests).
    connected: Notify,
}

impl Transport {
    /// Builds a transport. `reconnect` is forced to `false` for
    /// [`Endpoint::Local`] regardless of the requested value.
    pub fn new(endpoint: Endpoint, reconnect: bool, bufsize: usize, queue_limit: usize) -> Self {
        let reconnect = reconnect && !endpoint.is_local();

        Self {
            endpoint,
            reconnect,
            bufsize,
            queue_limit,
            state: Mutex::new(State {
                writer: None,
                queue: VecDeque::new(),
            }),
            connected: Notify::new(),
        }
    }

    /// True if reconnect is enabled for this transport (always false for
    /// [`Endpoint::Local`]).
    pub fn reconnects(&self) -> bool {
        self.reconnect
    }

    /// True for [`Endpoint::Local`].
    pub fn is_local(&self) -> bool {
        self.endpoint.is_local()
    }

    /// Dials the endpoint fresh, without touching any shared state. The
    /// caller (the engine's reconnect loop) writes the `%%>connect` line
    /// and replays the registry directly on the returned writer *before*
    /// calling [`Self::install`], so replayed lines are never interleaved
    /// with the parked offline queue.
    pub async fn dial(&self) -> Result<(BoxRead, BoxWrite)> {
        self.endpoint.dial().await
    }

    /// Writes one already-framed line directly to `writer`, truncating to
    /// `bufsize` and appending a trailing newline if absent (spec §4.2).
    /// Used both by [`Self::send_line`] and by the engine's registry
    /// replay, which writes straight to a freshly dialed writer that
    /// hasn't been [`installed`](Self::install) yet.
    pub async fn write_line(writer: &mut BoxWrite, line: &str, bufsize: usize) -> Result<()> {
        let mut line = line.to_string();
        truncate_to_bufsize(&mut line, bufsize);
        if !line.ends_with('\n') {
            line.push('\n');
        }

        writer.write_all(line.as_bytes()).await?;
        writer.flush().await.map_err(Into::into)
    }

    /// Installs a freshly dialed, already-replayed writer as the live
    /// connection, then drains and sends the offline queue in FIFO order
    /// (spec §3 invariant iii).
    pub async fn install(&self, writer: BoxWrite) -> Result<()> {
        let queue = {
            let mut state = self.state.lock().await;
            state.writer = Some(writer);
            std::mem::take(&mut state.queue)
        };

        self.connected.notify_waiters();

        for line in queue {
            self.send_line(line).await?;
        }

        Ok(())
    }

    /// Clears the live writer, so subsequent [`Self::send_line`] calls
    /// park on the offline queue (or fail, if reconnect is disabled).
    pub async fn mark_disconnected(&self) {
        self.state.lock().await.writer = None;
    }

    /// Sends one line, serialized behind the single-writer lock. While
    /// disconnected, the line is appended to the bounded offline queue
    /// (spec §4.2 default 100) unless reconnect is disabled, in which
    /// case this fails immediately with [`Error::NotConnected`].
    pub async fn send_line(&self, mut line: String) -> Result<()> {
        truncate_to_bufsize(&mut line, self.bufsize);
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut state = self.state.lock().await;
        match state.writer.as_mut() {
            Some(writer) => {
                if let Err(err) = writer.write_all(line.as_bytes()).await.and(writer.flush().await) {
                    state.writer = None;
                    if self.reconnect {
                        state.queue.push_back(line);
                    }

                    return Err(err.into());
                }

                Ok(())
            }
            None if self.reconnect => {
                if state.queue.len() >= self.queue_limit {
                    return Err(Error::QueueFull(state.queue.len()));
                }

                state.queue.push_back(line);
                Ok(())
            }
            None => Err(Error::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queues_while_disconnected_and_rejects_over_limit() {
        let transport = Transport::new(Endpoint::Tcp { host: "127.0.0.1".into(), port: 1 }, true, 8192, 2);

        transport.send_line("one".into()).await.unwrap();
        transport.send_line("two".into()).await.unwrap();

        let err = transport.send_line("three".into()).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull(2)));
    }

    #[tokio::test]
    async fn local_endpoint_never_queues() {
        let transport = Transport::new(Endpoint::Local, true, 8192, 100);
        assert!(!transport.reconnects());
    }

    /// A multi-byte codepoint straddling the truncation boundary must not
    /// panic `String::truncate`; the line is shortened to the nearest
    /// preceding char boundary instead.
    #[test]
    fn truncate_to_bufsize_steps_back_to_char_boundary() {
        let mut line = "a".repeat(7);
        line.push('é'); // 2 bytes in UTF-8, straddles byte offset 8

        truncate_to_bufsize(&mut line, 8);

        assert_eq!(line, "a".repeat(7));
    }
}
