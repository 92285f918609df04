//! # msgnet
//!
//! Asynchronous message-oriented transport over TCP.
//!
//! Peers exchange framed [`Message`](core::message::Message)s: an 8-byte header
//! carrying an application-defined kind and the body length, followed by a
//! body that behaves as a stack of plain-old-data values. Every connection
//! must pass a nonce/scramble handshake before it may carry messages.
//!
//! ## Layout
//! - [`core`]: message layout and stream framing
//! - [`protocol`]: the validation handshake
//! - [`queue`]: the blocking thread-safe queue used for received messages
//! - [`transport`]: connections, [`Client`](transport::client::Client) and
//!   [`Server`](transport::server::Server)
//! - [`config`], [`error`], [`utils`]: configuration, error types, logging,
//!   metrics and timeouts
//!
//! Socket I/O runs on a dedicated thread. Received messages are queued, and
//! the application drains them on its own thread: the client through
//! `incoming()`, the server through `update()`, which hands each message to
//! [`ServerHandler::on_message`](transport::server::ServerHandler::on_message).

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod transport;
pub mod utils;

pub use crate::core::message::{Message, MessageHeader, MessageKind, OwnedMessage};
pub use crate::error::{ProtocolError, Result};
pub use crate::queue::TsQueue;
pub use crate::transport::client::Client;
pub use crate::transport::connection::{Connection, ConnectionState, Role};
pub use crate::transport::server::{Server, ServerHandler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
