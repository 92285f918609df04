//! Timeout defaults and helpers for async operations.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for connection attempts and socket writes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a peer has to complete the nonce exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long stopping an I/O thread may wait for in-flight tasks
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `future`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
