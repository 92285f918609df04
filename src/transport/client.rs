//! # Client
//!
//! Owns one outbound [`Connection`] and the dedicated I/O thread that drives it.
//!
//! The application never gets callbacks from the I/O thread. Everything the
//! server sends lands in [`Client::incoming`], which the application drains on
//! its own thread at its own pace.
//!
//! ```rust,no_run
//! use msgnet::core::message::Message;
//! use msgnet::transport::client::Client;
//! use std::time::Duration;
//!
//! let mut client = Client::<u32>::new();
//! if client.connect("127.0.0.1", 60000) {
//!     client.send(Message::new(0));
//!     if client.incoming().wait_timeout(Duration::from_secs(1)) {
//!         let reply = client.incoming().pop_front();
//!         println!("{reply:?}");
//!     }
//! }
//! client.disconnect();
//! ```
//!
//! `connect` and `disconnect` block the calling thread and must not be called
//! from inside an async runtime.

use std::sync::Arc;

use tokio::net::{lookup_host, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, instrument};

use crate::config::ClientConfig;
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{constants, ProtocolError, Result};
use crate::queue::TsQueue;
use crate::transport::connection::{Connection, ConnectionSettings, Role};
use crate::utils::timeout::with_timeout_error;

pub struct Client<K: MessageKind> {
    config: ClientConfig,
    runtime: Option<Runtime>,
    connection: Option<Arc<Connection<K>>>,
    incoming: Arc<TsQueue<OwnedMessage<K>>>,
}

impl<K: MessageKind> Client<K> {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            runtime: None,
            connection: None,
            incoming: Arc::new(TsQueue::new()),
        }
    }

    /// Resolve `host`, open a socket and start the I/O thread.
    ///
    /// Returns `false` if resolution or the TCP connect fails; the client is
    /// then left disconnected and can be used again. A `true` result only
    /// means the socket is open: the handshake continues in the background,
    /// and a server that rejects it closes the socket, which
    /// [`Client::is_connected`] then reports.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        if self.connection.is_some() {
            self.disconnect();
        }

        match self.try_connect(host, port) {
            Ok(()) => true,
            Err(e) => {
                error!(host, port, error = %e, "Client connect failed");
                false
            }
        }
    }

    #[instrument(skip(self))]
    fn try_connect(&mut self, host: &str, port: u16) -> Result<()> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("msgnet-client-io")
            .enable_all()
            .build()
            .map_err(|e| ProtocolError::Custom(format!("{}: {e}", constants::ERR_RUNTIME_BUILD)))?;

        let stream = runtime.block_on(with_timeout_error(
            connect_any(host, port),
            self.config.connection_timeout,
        ))?;
        let peer = stream.peer_addr()?;

        let connection = Connection::new(0, Role::Client, peer);
        let settings = ConnectionSettings {
            handshake_timeout: self.config.handshake_timeout,
            write_timeout: self.config.write_timeout,
            transport: self.config.transport.clone(),
        };
        {
            let _io = runtime.enter();
            connection.start(stream, Arc::clone(&self.incoming), settings, None);
        }

        info!(%peer, "Connected to server");
        self.runtime = Some(runtime);
        self.connection = Some(connection);
        Ok(())
    }

    /// Close the connection and stop the I/O thread.
    ///
    /// Blocks until the I/O thread has stopped (or `shutdown_timeout` passes),
    /// so no further messages are pushed to [`Client::incoming`] afterwards.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.config.shutdown_timeout);
            info!("Client disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Queue `msg` for the server. Does nothing while disconnected.
    pub fn send(&self, msg: Message<K>) {
        match &self.connection {
            Some(connection) if connection.is_connected() => connection.send(msg),
            _ => debug!("{}: dropping {}", constants::ERR_NOT_CONNECTED, msg),
        }
    }

    /// Messages received from the server, oldest first.
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<K>> {
        &self.incoming
    }

    pub fn connection(&self) -> Option<&Arc<Connection<K>>> {
        self.connection.as_ref()
    }
}

impl<K: MessageKind> Default for Client<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> Drop for Client<K> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Try every resolved address in order until one accepts.
async fn connect_any(host: &str, port: u16) -> Result<TcpStream> {
    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| ProtocolError::AddressResolution(format!("{host}:{port}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => ProtocolError::Io(e),
        None => ProtocolError::AddressResolution(format!(
            "{host}:{port}: {}",
            constants::ERR_NO_ADDRESS
        )),
    })
}
