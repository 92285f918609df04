//! Frame codec for [`Message`] over a byte stream.
//!
//! Wire layout of one frame:
//! ```text
//! [kind: u32 LE] [body_size: u32 LE] [body: body_size bytes]
//! ```
//! The body size is checked against the configured limit as soon as the
//! header is available, before any buffer is grown for the body.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_BODY_SIZE;
use crate::core::message::{Message, MessageHeader, MessageKind, HEADER_SIZE};
use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy)]
pub struct MessageCodec<K> {
    max_body_size: usize,
    _kind: PhantomData<K>,
}

impl<K> MessageCodec<K> {
    pub fn new() -> Self {
        Self::with_max_body_size(MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(max_body_size: usize) -> Self {
        Self {
            max_body_size,
            _kind: PhantomData,
        }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl<K> Default for MessageCodec<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> Decoder for MessageCodec<K> {
    type Item = Message<K>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&src[..HEADER_SIZE]);
        let header = MessageHeader::<K>::from_bytes(&raw)?;

        let body_len = header.body_size as usize;
        if body_len > self.max_body_size {
            return Err(ProtocolError::OversizedBody(body_len));
        }

        let frame_len = HEADER_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_len).to_vec();
        Ok(Some(Message::from_parts(header.kind, body)))
    }
}

impl<K: MessageKind> Encoder<Message<K>> for MessageCodec<K> {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message<K>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = msg.body().len();
        if body_len > self.max_body_size {
            return Err(ProtocolError::OversizedBody(body_len));
        }

        dst.reserve(msg.size());
        dst.put_slice(&msg.header.to_bytes());
        dst.put_slice(&msg.into_body());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: Message<u32>) -> BytesMut {
        let mut buf = BytesMut::new();
        MessageCodec::<u32>::new().encode(msg, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_empty_body_is_header_only() {
        let buf = encode(Message::new(9u32));
        assert_eq!(&buf[..], &[9, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut msg = Message::new(1u32);
        msg.push(0xAABBu16);
        let full = encode(msg);

        let mut codec = MessageCodec::<u32>::new();
        let mut buf = BytesMut::from(&full[..HEADER_SIZE + 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 1);

        buf.extend_from_slice(&full[HEADER_SIZE + 1..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.body_size, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_body_rejected_from_header() {
        let mut codec = MessageCodec::<u32>::with_max_body_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(17);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedBody(17))
        ));
    }

    #[test]
    fn test_oversized_body_rejected_on_encode() {
        let mut msg = Message::new(1u32);
        msg.push_bytes(&[0u8; 32]);
        let mut buf = BytesMut::new();
        let result = MessageCodec::<u32>::with_max_body_size(16).encode(msg, &mut buf);
        assert!(matches!(result, Err(ProtocolError::OversizedBody(32))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        struct OnlyZero;

        impl MessageKind for OnlyZero {
            fn to_wire(self) -> u32 {
                0
            }

            fn from_wire(raw: u32) -> Option<Self> {
                (raw == 0).then_some(OnlyZero)
            }
        }

        let mut buf = BytesMut::new();
        buf.put_u32_le(5);
        buf.put_u32_le(0);
        let result = MessageCodec::<OnlyZero>::new().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::UnknownKind(5))));
    }
}
