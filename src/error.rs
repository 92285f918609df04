//! # Error Types
//!
//! Error handling for the message transport.
//!
//! ## Error Categories
//! - **I/O Errors**: socket read/write/accept failures. Fatal to the single
//!   connection they occur on; the connection is closed and never retried.
//! - **Framing Errors**: oversized bodies and unknown message kinds read off
//!   the wire. Treated exactly like I/O errors by the connection.
//! - **Handshake Errors**: a peer that answered the nonce with the wrong value
//!   or never answered at all.
//! - **Codec Errors**: popping more bytes than a message body holds. These are
//!   local programming errors and are returned to the caller composing the
//!   message.
//!
//! Transport-internal errors are handled where they occur (connection
//! teardown) and are never returned across `send`/`incoming`. They reach the
//! application only through the disconnect hooks and the log.
//!
//! ## Example Usage
//! ```rust
//! use msgnet::core::message::Message;
//! use msgnet::error::ProtocolError;
//!
//! let mut msg = Message::new(1u32);
//! msg.push(7u16);
//! match msg.pop::<u64>() {
//!     Err(ProtocolError::Underflow { requested, available }) => {
//!         assert_eq!((requested, available), (8, 2));
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Static strings for error paths that would otherwise allocate.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Not connected";

    /// Handshake errors
    pub const ERR_HANDSHAKE_MISMATCH: &str = "Handshake response did not match";
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "Peer did not complete the handshake in time";

    /// Runtime errors
    pub const ERR_RUNTIME_BUILD: &str = "Failed to build I/O runtime";
    pub const ERR_NO_ADDRESS: &str = "Address resolved to no endpoints";
}

/// ProtocolError is the error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Body underflow: requested {requested} bytes, {available} available")]
    Underflow { requested: usize, available: usize },

    #[error("Message body too large: {0} bytes")]
    OversizedBody(usize),

    #[error("Unknown message kind: {0}")]
    UnknownKind(u32),

    #[error("Handshake mismatch: expected {expected:#018x}, received {received:#018x}")]
    HandshakeMismatch { expected: u64, received: u64 },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the error means the peer went away rather than misbehaved.
    ///
    /// Used to pick the log level when a connection is torn down.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(ProtocolError::ConnectionClosed.is_disconnect());
        assert!(ProtocolError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_disconnect());
        assert!(ProtocolError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_disconnect());
        assert!(!ProtocolError::OversizedBody(1).is_disconnect());
        assert!(!ProtocolError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_disconnect());
    }

    #[test]
    fn test_handshake_mismatch_display() {
        let err = ProtocolError::HandshakeMismatch {
            expected: 0x1,
            received: 0xFF,
        };
        assert_eq!(
            err.to_string(),
            "Handshake mismatch: expected 0x0000000000000001, received 0x00000000000000ff"
        );
    }
}
