use thiserror::Error;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur while connecting or writing to the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected and reconnect is disabled")]
    NotConnected,

    #[error("offline queue is full ({0} pending lines)")]
    QueueFull(usize),
}
