//! Connection validation handshake
//!
//! Before a socket is admitted to the message loop the server proves that the
//! peer speaks the same protocol:
//!
//! ```text
//! Server -> Client: 8 bytes, random u64 nonce (LE)
//! Client -> Server: 8 bytes, scramble(nonce) (LE)
//! ```
//!
//! [`scramble`] is a fixed bit-mixing function shared by both ends. It is a
//! protocol compatibility check, not authentication: anyone who knows the
//! function can answer correctly. The random nonce only stops a recorded
//! response from being replayed verbatim.
//!
//! Handshake state is per connection. [`ServerHandshake`] holds the nonce it
//! issued and the answer it expects; the client side is stateless.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::{ProtocolError, Result};
use crate::utils::timeout::with_timeout_error;

/// Size of both handshake messages on the wire
pub const HANDSHAKE_LEN: usize = 8;

/// Mix `input` into the value a compatible peer must answer with.
///
/// The nibble-swap masks only cover the low 56 bits, so the top byte of the
/// intermediate value is dropped. Both ends must use this exact function.
pub const fn scramble(input: u64) -> u64 {
    let out = input ^ 0xDEAD_BEEF_C0DE_CAFE;
    let out = ((out & 0x00F0_F0F0_F0F0_F0F0) >> 4) | ((out & 0x000F_0F0F_0F0F_0F0F) << 4);
    out ^ 0xC0DE_FACE_1234_5678
}

/// Server-side handshake state for one connection
#[derive(Debug, Clone, Copy)]
pub struct ServerHandshake {
    nonce: u64,
    expected: u64,
}

impl ServerHandshake {
    /// Issue a fresh random nonce and precompute the expected answer.
    pub fn new() -> Self {
        Self::with_nonce(rand::random::<u64>())
    }

    pub fn with_nonce(nonce: u64) -> Self {
        Self {
            nonce,
            expected: scramble(nonce),
        }
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Bytes to send to the client
    pub fn challenge(&self) -> [u8; HANDSHAKE_LEN] {
        self.nonce.to_le_bytes()
    }

    /// Check the client's answer.
    pub fn verify(&self, response: [u8; HANDSHAKE_LEN]) -> Result<()> {
        let received = u64::from_le_bytes(response);
        if received == self.expected {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeMismatch {
                expected: self.expected,
                received,
            })
        }
    }
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the client's answer to a server challenge.
pub fn client_response(challenge: [u8; HANDSHAKE_LEN]) -> [u8; HANDSHAKE_LEN] {
    scramble(u64::from_le_bytes(challenge)).to_le_bytes()
}

/// Run the server side of the exchange on a freshly accepted stream.
///
/// Fails with [`ProtocolError::HandshakeMismatch`] on a wrong answer and with
/// [`ProtocolError::Timeout`] if the client does not answer within `timeout`.
#[instrument(skip(stream), level = "debug")]
pub async fn server_handshake<S>(stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let state = ServerHandshake::new();

    with_timeout_error(
        async {
            stream.write_all(&state.challenge()).await?;
            stream.flush().await?;

            let mut response = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut response).await?;
            state.verify(response)
        },
        timeout,
    )
    .await?;

    debug!("Client answered handshake");
    Ok(())
}

/// Run the client side: read the nonce, answer it, return.
///
/// The client never hears back whether its answer was accepted. A server that
/// rejects it simply closes the socket, which the read loop then observes.
#[instrument(skip(stream), level = "debug")]
pub async fn client_handshake<S>(stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_timeout_error(
        async {
            let mut challenge = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut challenge).await?;

            stream.write_all(&client_response(challenge)).await?;
            stream.flush().await?;
            Ok(())
        },
        timeout,
    )
    .await?;

    debug!("Answered server handshake");
    Ok(())
}
