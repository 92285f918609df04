//! Property-based tests using proptest
//!
//! Message body and framing invariants across randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use msgnet::core::codec::MessageCodec;
use msgnet::core::message::{Message, HEADER_SIZE};
use msgnet::error::ProtocolError;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone)]
enum Value {
    U8(u8),
    U32(u32),
    I64(i64),
    F64(f64),
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<u8>().prop_map(Value::U8),
        any::<u32>().prop_map(Value::U32),
        any::<i64>().prop_map(Value::I64),
        any::<f64>().prop_map(Value::F64),
    ]
}

fn push(msg: &mut Message<u32>, v: &Value) {
    match *v {
        Value::U8(x) => msg.push(x),
        Value::U32(x) => msg.push(x),
        Value::I64(x) => msg.push(x),
        Value::F64(x) => msg.push(x),
    };
}

// Property: values pop back out in reverse push order, bit for bit
proptest! {
    #[test]
    fn prop_body_is_lifo(values in prop::collection::vec(value(), 0..64)) {
        let mut msg = Message::new(1u32);
        for v in &values {
            push(&mut msg, v);
        }

        for v in values.iter().rev() {
            match *v {
                Value::U8(x) => prop_assert_eq!(msg.pop::<u8>().unwrap(), x),
                Value::U32(x) => prop_assert_eq!(msg.pop::<u32>().unwrap(), x),
                Value::I64(x) => prop_assert_eq!(msg.pop::<i64>().unwrap(), x),
                Value::F64(x) => prop_assert_eq!(msg.pop::<f64>().unwrap().to_bits(), x.to_bits()),
            }
        }
        prop_assert!(msg.is_empty());
    }
}

// Property: the header always reports the current body length
proptest! {
    #[test]
    fn prop_body_size_tracks_body(values in prop::collection::vec(value(), 0..64), pops in 0usize..64) {
        let mut msg = Message::new(0u32);
        for v in &values {
            push(&mut msg, v);
            prop_assert_eq!(msg.header.body_size as usize, msg.body().len());
        }
        for _ in 0..pops {
            let _ = msg.pop::<u8>();
            prop_assert_eq!(msg.header.body_size as usize, msg.body().len());
        }
        prop_assert_eq!(msg.size(), HEADER_SIZE + msg.body().len());
    }
}

// Property: a failed pop leaves the body untouched
proptest! {
    #[test]
    fn prop_underflow_is_non_destructive(body in prop::collection::vec(any::<u8>(), 0..8)) {
        let mut msg = Message::new(0u32);
        msg.push_bytes(&body);

        let err = msg.pop::<u64>().unwrap_err();
        let is_underflow = matches!(err, ProtocolError::Underflow { requested: 8, available } if available == body.len());
        prop_assert!(is_underflow);
        prop_assert_eq!(msg.body(), &body[..]);
    }
}

// Property: a stream of frames cut at arbitrary points decodes to the same frames
proptest! {
    #[test]
    fn prop_framing_survives_arbitrary_splits(
        frames in prop::collection::vec((any::<u32>(), prop::collection::vec(any::<u8>(), 0..512)), 1..16),
        chunk in 1usize..64,
    ) {
        let mut codec = MessageCodec::<u32>::new();
        let mut wire = BytesMut::new();
        let mut sent = Vec::new();
        for (kind, body) in &frames {
            let mut msg = Message::new(*kind);
            msg.push_bytes(body);
            codec.encode(msg.clone(), &mut wire).unwrap();
            sent.push(msg);
        }

        let mut buf = BytesMut::new();
        let mut received = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(msg) = codec.decode(&mut buf).unwrap() {
                received.push(msg);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(received, sent);
    }
}
