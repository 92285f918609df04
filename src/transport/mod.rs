//! # Transport Layer
//!
//! TCP connections and the client and server façades built on them.
//!
//! ## Components
//! - **Connection**: one socket, its handshake and its read/write loops
//! - **Client**: a single outbound connection with its own I/O thread
//! - **Server**: an accept loop, a pool of validated clients and the
//!   application hooks
//!
//! Both façades run their sockets on a dedicated single-worker Tokio runtime.
//! The application thread only ever touches queues and handles.

pub mod client;
pub mod connection;
pub mod server;
