#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use msgnet::core::codec::MessageCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever yield frames, "need more" or an error.
    let mut codec = MessageCodec::<u32>::with_max_body_size(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(mut msg)) = codec.decode(&mut buf) {
        while msg.pop::<u32>().is_ok() {}
    }
});
