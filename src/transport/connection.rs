//! # Connection
//!
//! One TCP socket and the task that drives it.
//!
//! A [`Connection`] is a cheap shared handle (`Arc<Connection<K>>`). The socket
//! itself is owned by a single driver task on the I/O runtime, which:
//!
//! 1. runs the validation handshake for its [`Role`],
//! 2. reports success through an injected callback (server side only),
//! 3. splits the socket and runs the read loop and the write loop side by
//!    side until either fails or [`Connection::disconnect`] is called.
//!
//! Writes never touch the socket from the caller's thread. [`Connection::send`]
//! pushes onto an unbounded channel that only the write loop drains, so frames
//! from concurrent senders are never interleaved and leave in the order they
//! were queued. Messages queued before the handshake completes are held until
//! it does.
//!
//! Every received frame is wrapped as an [`OwnedMessage`] and pushed onto the
//! shared inbound queue. The read loop is strictly sequential, so frames from
//! one connection arrive in wire order.
//!
//! ## Lifecycle
//! ```text
//! Connecting -> Handshaking -> Validated -> Closed
//!                    \___________________/
//!                     (failure, timeout or disconnect)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::core::codec::MessageCodec;
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{client_handshake, server_handshake};
use crate::queue::TsQueue;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Which end of the handshake a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server; issues the nonce and checks the answer
    Server,
    /// Opened by a client; answers the nonce
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Handshaking = 1,
    Validated = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Validated,
            _ => ConnectionState::Closed,
        }
    }
}

/// Called once, on the I/O thread, when a server-side handshake succeeds.
pub type ValidatedCallback<K> = Box<dyn FnOnce(&Arc<Connection<K>>) + Send + 'static>;

/// Per-connection I/O limits
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub transport: TransportConfig,
}

type InboundQueue<K> = Arc<TsQueue<OwnedMessage<K>>>;

pub struct Connection<K: MessageKind> {
    id: u32,
    role: Role,
    peer_addr: SocketAddr,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Message<K>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message<K>>>>,
    shutdown: CancellationToken,
}

impl<K: MessageKind> Connection<K> {
    pub(crate) fn new(id: u32, role: Role, peer_addr: SocketAddr) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            role,
            peer_addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Unique per server; always 0 on a client.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until the socket has been closed for any reason.
    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// Queue `msg` for the write loop. Silently dropped once closed.
    pub fn send(&self, msg: Message<K>) {
        if !self.is_connected() {
            trace!(id = self.id, "{}: dropping {}", constants::ERR_NOT_CONNECTED, msg);
            return;
        }
        if self.outbound.send(msg).is_err() {
            trace!(id = self.id, "{}", constants::ERR_CONNECTION_CLOSED);
        }
    }

    /// Close the socket. Safe to call from any thread, any number of times.
    pub fn disconnect(&self) {
        if self.mark_closed() {
            debug!(id = self.id, peer = %self.peer_addr, "Disconnect requested");
        }
        self.shutdown.cancel();
    }

    /// Returns true if this call moved the connection to `Closed`.
    fn mark_closed(&self) -> bool {
        self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    /// Move `from -> to` unless the connection was closed in the meantime.
    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hand the socket to a driver task on the current runtime.
    ///
    /// Must be called from within a Tokio runtime. Calling it twice is a no-op.
    pub(crate) fn start(
        self: &Arc<Self>,
        stream: TcpStream,
        inbound: InboundQueue<K>,
        settings: ConnectionSettings,
        on_validated: Option<ValidatedCallback<K>>,
    ) {
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            warn!(id = self.id, "Connection already started");
            return;
        };

        if settings.transport.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(id = self.id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let conn = Arc::clone(self);
        tokio::spawn(conn.run(stream, outbound_rx, inbound, settings, on_validated));
    }

    #[instrument(
        name = "connection",
        skip_all,
        fields(id = self.id, role = ?self.role, peer = %self.peer_addr)
    )]
    async fn run(
        self: Arc<Self>,
        mut stream: TcpStream,
        outbound_rx: mpsc::UnboundedReceiver<Message<K>>,
        inbound: InboundQueue<K>,
        settings: ConnectionSettings,
        on_validated: Option<ValidatedCallback<K>>,
    ) {
        let metrics = global_metrics();
        let _driver = DriverGuard::new(Arc::clone(&self));

        if self.advance(ConnectionState::Connecting, ConnectionState::Handshaking) {
            metrics.handshake_attempt();
            let handshake = tokio::select! {
                _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
                result = self.handshake(&mut stream, settings.handshake_timeout) => result,
            };

            match handshake {
                Ok(()) if self.advance(ConnectionState::Handshaking, ConnectionState::Validated) => {
                    metrics.handshake_success();
                    info!("Connection validated");
                    if let Some(callback) = on_validated {
                        callback(&self);
                    }
                    self.pump(stream, outbound_rx, inbound, &settings).await;
                }
                Ok(()) => debug!("Closed during handshake"),
                Err(e) => {
                    metrics.handshake_failed();
                    match &e {
                        ProtocolError::HandshakeMismatch { .. } => {
                            warn!(error = %e, "{}", constants::ERR_HANDSHAKE_MISMATCH)
                        }
                        ProtocolError::Timeout => warn!("{}", constants::ERR_HANDSHAKE_TIMEOUT),
                        _ => debug!(error = %e, "Handshake failed"),
                    }
                }
            }
        }
    }

    async fn handshake(&self, stream: &mut TcpStream, timeout: Duration) -> Result<()> {
        match self.role {
            Role::Server => server_handshake(stream, timeout).await,
            Role::Client => client_handshake(stream, timeout).await,
        }
    }

    /// Run the read and write loops until one of them ends or shutdown is requested.
    async fn pump(
        self: &Arc<Self>,
        stream: TcpStream,
        outbound_rx: mpsc::UnboundedReceiver<Message<K>>,
        inbound: InboundQueue<K>,
        settings: &ConnectionSettings,
    ) {
        let max_body = settings.transport.max_body_size;
        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, MessageCodec::<K>::with_max_body_size(max_body));
        let writer = FramedWrite::new(write_half, MessageCodec::<K>::with_max_body_size(max_body));

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Ok(()),
            result = self.read_loop(reader, inbound) => result,
            result = self.write_loop(writer, outbound_rx, settings.write_timeout) => result,
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => debug!("Peer disconnected"),
            Err(e @ (ProtocolError::OversizedBody(_) | ProtocolError::UnknownKind(_))) => {
                global_metrics().protocol_error();
                warn!(error = %e, "Closing connection on framing error");
            }
            Err(e) => {
                global_metrics().connection_error();
                warn!(error = %e, "Closing connection on I/O error");
            }
        }
    }

    async fn read_loop(
        self: &Arc<Self>,
        mut reader: FramedRead<OwnedReadHalf, MessageCodec<K>>,
        inbound: InboundQueue<K>,
    ) -> Result<()> {
        while let Some(frame) = reader.next().await {
            let msg = frame?;
            global_metrics().message_received(msg.size() as u64);
            trace!(%msg, "Frame received");

            let remote = match self.role {
                Role::Server => Some(Arc::clone(self)),
                Role::Client => None,
            };
            inbound.push_back(OwnedMessage { remote, msg });
        }
        Err(ProtocolError::ConnectionClosed)
    }

    async fn write_loop(
        &self,
        mut writer: FramedWrite<OwnedWriteHalf, MessageCodec<K>>,
        mut outbound_rx: mpsc::UnboundedReceiver<Message<K>>,
        write_timeout: Duration,
    ) -> Result<()> {
        while let Some(msg) = outbound_rx.recv().await {
            let size = msg.size() as u64;
            trace!(%msg, "Writing frame");
            with_timeout_error(
                async {
                    writer.send(msg).await?;
                    Ok(())
                },
                write_timeout,
            )
            .await?;
            global_metrics().message_sent(size);
        }
        Ok(())
    }
}

/// Closes the connection and settles the active-connection count when the
/// driver task ends, including when its runtime drops it mid-await.
struct DriverGuard<K: MessageKind> {
    conn: Arc<Connection<K>>,
}

impl<K: MessageKind> DriverGuard<K> {
    fn new(conn: Arc<Connection<K>>) -> Self {
        global_metrics().connection_established();
        Self { conn }
    }
}

impl<K: MessageKind> Drop for DriverGuard<K> {
    fn drop(&mut self) {
        self.conn.mark_closed();
        self.conn.shutdown.cancel();
        global_metrics().connection_closed();
        debug!(id = self.conn.id, "Connection closed");
    }
}

impl<K: MessageKind> fmt::Debug for Connection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
