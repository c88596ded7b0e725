#![doc = include_str!("../README.md")]
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::unimplemented)]

pub mod wire;
pub use wire::params::ParamMap;

mod transport;
pub use transport::Endpoint;

mod registry;
mod router;

pub mod handler;
pub use handler::{Handler, HandlerOutcome, SharedHandler, SharedWatcher, Watcher};

mod message;
pub use message::{Message, MessageKind};

pub mod engine;
pub use engine::{Config, Engine};

pub mod channel;
pub use channel::Channel;

mod output;
pub use output::OutputSink;
