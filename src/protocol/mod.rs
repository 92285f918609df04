//! # Protocol Layer
//!
//! The one-time validation exchange that every connection performs before it
//! is allowed to carry messages. Framing itself lives in [`crate::core`].

pub mod handshake;
