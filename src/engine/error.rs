use thiserror::Error;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur while driving the engine connection or one of
/// its request-layer operations.
///
/// Note that a *timeout* is deliberately **not** a variant here: a
/// correlated operation that times out resolves quietly with a sentinel
/// (`None`/`false`/the original message) rather than propagating an error.
#[derive(Debug, Error)]
pub enum Error {
    /// A codec-level decoding error surfaced as a connection-level signal.
    #[error("wire codec error: {0}")]
    Wire(#[from] crate::wire::Error),

    /// An I/O or connect-time transport error.
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::Error),

    /// A handler or watcher filter's regular expression failed to
    /// compile.
    #[error("invalid filter expression: {0}")]
    Filter(#[from] regex::Error),

    /// The connection dropped and reconnect is disabled; no further
    /// operations can be served.
    #[error("not connected and reconnect is disabled")]
    NotConnected,

    /// The engine closed the stream entirely while a correlated reply was
    /// still pending.
    #[error("unexpected end of stream from the engine")]
    UnexpectedEof,

    /// The current operation's channel was reset before it completed.
    #[error("channel was reset before the operation completed")]
    Reset,
}
