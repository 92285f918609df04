//! # Messages
//!
//! A message is a fixed 8-byte header followed by a variable-length body.
//!
//! The body behaves like a stack: [`Message::push`] appends the raw bytes of a
//! plain-old-data value to the tail and [`Message::pop`] removes the most
//! recently pushed value from the tail. Values therefore come back out in the
//! reverse order they went in.
//!
//! ```rust
//! use msgnet::core::message::Message;
//!
//! let mut msg = Message::new(7u32);
//! msg.push(1.5f32).push(42u64);
//! assert_eq!(msg.header.body_size, 12);
//!
//! assert_eq!(msg.pop::<u64>().unwrap(), 42);
//! assert_eq!(msg.pop::<f32>().unwrap(), 1.5);
//! assert!(msg.is_empty());
//! ```
//!
//! Only `bytemuck::Pod` types can be pushed: they have a fixed memory layout
//! with no padding and no pointers, so their bytes are reproducible. Body
//! values use the platform's native byte order; the header is always
//! little-endian.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{ProtocolError, Result};
use crate::transport::connection::Connection;

/// Identifies what a message means to the application.
///
/// Implemented by application enums so message kinds are checked at compile
/// time. On the wire a kind is a `u32`; [`MessageKind::from_wire`] returns
/// `None` for values outside the closed set, which the decoder turns into a
/// framing error.
///
/// ```rust
/// use msgnet::core::message::MessageKind;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// enum Kind {
///     Ping,
///     Pong,
/// }
///
/// impl MessageKind for Kind {
///     fn to_wire(self) -> u32 {
///         self as u32
///     }
///
///     fn from_wire(raw: u32) -> Option<Self> {
///         match raw {
///             0 => Some(Kind::Ping),
///             1 => Some(Kind::Pong),
///             _ => None,
///         }
///     }
/// }
///
/// assert_eq!(Kind::from_wire(Kind::Pong.to_wire()), Some(Kind::Pong));
/// assert_eq!(Kind::from_wire(9), None);
/// ```
pub trait MessageKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn to_wire(self) -> u32;
    fn from_wire(raw: u32) -> Option<Self>;
}

/// Open set of kinds, for applications that route on raw numbers.
impl MessageKind for u32 {
    fn to_wire(self) -> u32 {
        self
    }

    fn from_wire(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Encoded header size: kind (4) + body size (4)
pub const HEADER_SIZE: usize = 8;

/// Fixed-size frame header.
///
/// `body_size` always equals the length of the owning message's body; it is
/// recomputed on every push and pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<K> {
    pub kind: K,
    pub body_size: u32,
}

impl<K: MessageKind> MessageHeader<K> {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.to_wire().to_le_bytes());
        out[4..].copy_from_slice(&self.body_size.to_le_bytes());
        out
    }

    /// Parse a header from exactly [`HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw_kind = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let body_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let kind = K::from_wire(raw_kind).ok_or(ProtocolError::UnknownKind(raw_kind))?;
        Ok(Self { kind, body_size })
    }
}

/// One frame: header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K> {
    pub header: MessageHeader<K>,
    body: Vec<u8>,
}

impl<K: MessageKind> Message<K> {
    pub fn new(kind: K) -> Self {
        Self {
            header: MessageHeader { kind, body_size: 0 },
            body: Vec::new(),
        }
    }

    pub fn with_capacity(kind: K, capacity: usize) -> Self {
        Self {
            header: MessageHeader { kind, body_size: 0 },
            body: Vec::with_capacity(capacity),
        }
    }

    /// Rebuild a message from a decoded header kind and body.
    pub(crate) fn from_parts(kind: K, body: Vec<u8>) -> Self {
        let mut msg = Self {
            header: MessageHeader { kind, body_size: 0 },
            body,
        };
        msg.sync_size();
        msg
    }

    #[inline]
    pub fn kind(&self) -> K {
        self.header.kind
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Bytes this message occupies on the wire.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Append `value` to the tail of the body.
    pub fn push<T: Pod>(&mut self, value: T) -> &mut Self {
        self.body.extend_from_slice(bytemuck::bytes_of(&value));
        self.sync_size();
        self
    }

    /// Remove the most recently pushed `T` from the tail of the body.
    ///
    /// # Errors
    /// [`ProtocolError::Underflow`] if fewer than `size_of::<T>()` bytes
    /// remain. The body is left untouched in that case.
    pub fn pop<T: Pod>(&mut self) -> Result<T> {
        let bytes = self.pop_bytes(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Append a run of raw bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self.sync_size();
        self
    }

    /// Remove the last `len` bytes of the body, returned in their original order.
    pub fn pop_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let available = self.body.len();
        if len > available {
            return Err(ProtocolError::Underflow {
                requested: len,
                available,
            });
        }
        let tail = self.body.split_off(available - len);
        self.sync_size();
        Ok(tail)
    }

    pub fn clear(&mut self) {
        self.body.clear();
        self.sync_size();
    }

    pub(crate) fn into_body(self) -> Vec<u8> {
        self.body
    }

    fn sync_size(&mut self) {
        // The codec refuses bodies larger than u32::MAX long before this point.
        self.header.body_size = self.body.len() as u32;
    }
}

impl<K: MessageKind> fmt::Display for Message<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind:{:?} Size:{}", self.header.kind, self.header.body_size)
    }
}

/// A message tagged with the connection it arrived on.
///
/// On a server `remote` is the sender. On a client it is always `None`,
/// since the only peer is the server.
#[derive(Debug, Clone)]
pub struct OwnedMessage<K: MessageKind> {
    pub remote: Option<Arc<Connection<K>>>,
    pub msg: Message<K>,
}

impl<K: MessageKind> fmt::Display for OwnedMessage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}
