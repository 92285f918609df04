//! # Core Message Components
//!
//! Message layout, body packing and stream framing.
//!
//! ## Components
//! - **Message**: header plus a stack-like body of plain-old-data values
//! - **Codec**: Tokio codec for framing messages over byte streams
//!
//! ## Wire Format
//! ```text
//! [Kind(4)] [BodySize(4)] [Body(N)]
//! ```
//! Both header fields are little-endian `u32`.
//!
//! ## Safety Limits
//! - Maximum body size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod message;
