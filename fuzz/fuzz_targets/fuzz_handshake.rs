#![no_main]

use libfuzzer_sys::fuzz_target;
use msgnet::protocol::handshake::{scramble, ServerHandshake};

fuzz_target!(|data: &[u8]| {
    // Only the scrambled nonce may ever verify.
    if data.len() < 16 {
        return;
    }
    let mut nonce = [0u8; 8];
    let mut response = [0u8; 8];
    nonce.copy_from_slice(&data[..8]);
    response.copy_from_slice(&data[8..16]);

    let handshake = ServerHandshake::with_nonce(u64::from_le_bytes(nonce));
    let accepted = handshake.verify(response).is_ok();
    assert_eq!(accepted, u64::from_le_bytes(response) == scramble(u64::from_le_bytes(nonce)));
});
