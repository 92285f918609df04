//! # Server
//!
//! Accepts clients on a dedicated I/O thread, validates them with the
//! handshake and keeps the validated ones in a pool.
//!
//! Application behaviour is supplied through a [`ServerHandler`]. Two hooks run
//! on the I/O thread (`on_client_connect`, `on_client_validated`); the other
//! two run on whichever thread calls [`Server::update`] or one of the send
//! methods. Messages are only ever dispatched from `update`, so the
//! application decides when and on which thread it does its work.
//!
//! ## Pool discipline
//! - A connection enters the pool only after its handshake succeeds.
//! - Connections are removed only by the application thread, when a send or
//!   `update` notices they have closed. `on_client_disconnect` fires exactly
//!   once, from the call that removed the connection.
//! - No hook is ever called while the pool lock is held.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use msgnet::core::message::Message;
//! use msgnet::transport::connection::Connection;
//! use msgnet::transport::server::{Server, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler<u32> for Echo {
//!     fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(&self, server: &Server<u32, Self>, client: &Arc<Connection<u32>>, msg: Message<u32>) {
//!         server.message_client(client, msg);
//!     }
//! }
//!
//! let mut server = Server::new(60000, Echo);
//! if server.start() {
//!     loop {
//!         server.update(usize::MAX, true);
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{ServerConfig, FIRST_CONNECTION_ID};
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{constants, ProtocolError, Result};
use crate::queue::TsQueue;
use crate::transport::connection::{Connection, ConnectionSettings, Role, ValidatedCallback};
use crate::utils::metrics::global_metrics;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Application hooks for a [`Server`].
///
/// All methods have defaults. The default `on_client_connect` rejects every
/// client, so a handler must opt in to accepting connections.
pub trait ServerHandler<K: MessageKind>: Send + Sync + Sized + 'static {
    /// A socket was accepted. Return `false` to close it before the handshake.
    ///
    /// Runs on the I/O thread.
    fn on_client_connect(&self, _client: &Arc<Connection<K>>) -> bool {
        false
    }

    /// The client passed the handshake and has joined the pool.
    ///
    /// Runs on the I/O thread.
    fn on_client_validated(&self, _client: &Arc<Connection<K>>) {}

    /// A pooled client was found closed and removed.
    fn on_client_disconnect(&self, _client: &Arc<Connection<K>>) {}

    /// A message arrived from `client`. Called from [`Server::update`].
    fn on_message(&self, _server: &Server<K, Self>, _client: &Arc<Connection<K>>, _msg: Message<K>) {}
}

/// State shared with the accept loop and the validation callbacks.
struct Shared<K: MessageKind> {
    pool: Mutex<Vec<Arc<Connection<K>>>>,
    inbound: Arc<TsQueue<OwnedMessage<K>>>,
    next_id: AtomicU32,
    /// Accepted connections whose handshake has not finished yet
    handshaking: AtomicUsize,
}

impl<K: MessageKind> Shared<K> {
    /// Pooled plus handshaking connections.
    fn occupied(&self) -> usize {
        self.pool.lock().len() + self.handshaking.load(Ordering::Acquire)
    }

    fn is_pooled(&self, client: &Arc<Connection<K>>) -> bool {
        self.pool.lock().iter().any(|c| Arc::ptr_eq(c, client))
    }
}

/// Holds one handshake slot against the connection limit until dropped.
struct HandshakeSlot<K: MessageKind> {
    shared: Arc<Shared<K>>,
}

impl<K: MessageKind> HandshakeSlot<K> {
    fn acquire(shared: &Arc<Shared<K>>) -> Self {
        shared.handshaking.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl<K: MessageKind> Drop for HandshakeSlot<K> {
    fn drop(&mut self) {
        self.shared.handshaking.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Server<K: MessageKind, H: ServerHandler<K>> {
    config: ServerConfig,
    handler: Arc<H>,
    shared: Arc<Shared<K>>,
    runtime: Option<Runtime>,
    local_addr: Option<SocketAddr>,
}

impl<K: MessageKind, H: ServerHandler<K>> Server<K, H> {
    /// Server listening on every IPv4 interface at `port`.
    pub fn new(port: u16, handler: H) -> Self {
        Self::with_config(ServerConfig::with_port(port), handler)
    }

    pub fn with_config(config: ServerConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            shared: Arc::new(Shared {
                pool: Mutex::new(Vec::new()),
                inbound: Arc::new(TsQueue::new()),
                next_id: AtomicU32::new(FIRST_CONNECTION_ID),
                handshaking: AtomicUsize::new(0),
            }),
            runtime: None,
            local_addr: None,
        }
    }

    /// Bind the listener and start accepting on the I/O thread.
    ///
    /// Returns `false` if the runtime or the listener could not be set up.
    pub fn start(&mut self) -> bool {
        if self.runtime.is_some() {
            warn!("Server already running");
            return true;
        }

        match self.try_start() {
            Ok(addr) => {
                info!(%addr, "Server started");
                true
            }
            Err(e) => {
                error!(address = %self.config.address, error = %e, "Server start failed");
                false
            }
        }
    }

    fn try_start(&mut self) -> Result<SocketAddr> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("msgnet-server-io")
            .enable_all()
            .build()
            .map_err(|e| ProtocolError::Custom(format!("{}: {e}", constants::ERR_RUNTIME_BUILD)))?;

        let listener = runtime.block_on(TcpListener::bind(self.config.address.as_str()))?;
        let addr = listener.local_addr()?;

        let acceptor = Acceptor {
            handler: Arc::clone(&self.handler),
            shared: Arc::clone(&self.shared),
            settings: ConnectionSettings {
                handshake_timeout: self.config.handshake_timeout,
                write_timeout: self.config.write_timeout,
                transport: self.config.transport.clone(),
            },
            max_connections: self.config.max_connections,
        };
        runtime.spawn(acceptor.run(listener));

        self.runtime = Some(runtime);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop accepting, close every pooled connection and join the I/O thread.
    ///
    /// Closed connections stay pooled until the next `update` or send prunes
    /// them, which is when `on_client_disconnect` fires for each.
    pub fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        for client in self.shared.pool.lock().iter() {
            client.disconnect();
        }
        runtime.shutdown_timeout(self.config.shutdown_timeout);
        self.local_addr = None;
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Send `msg` to one client, or remove it if it has closed.
    pub fn message_client(&self, client: &Arc<Connection<K>>, msg: Message<K>) {
        if client.is_connected() {
            client.send(msg);
        } else {
            self.remove(|c| Arc::ptr_eq(c, client));
        }
    }

    /// Send a copy of `msg` to every pooled client except `ignore`.
    ///
    /// Clients found closed along the way are removed after the pass.
    pub fn message_all_clients(&self, msg: &Message<K>, ignore: Option<&Arc<Connection<K>>>) {
        let mut dead = false;
        {
            let pool = self.shared.pool.lock();
            for client in pool.iter() {
                if !client.is_connected() {
                    dead = true;
                } else if !ignore.is_some_and(|skip| Arc::ptr_eq(skip, client)) {
                    client.send(msg.clone());
                }
            }
        }

        if dead {
            self.prune();
        }
    }

    /// Dispatch up to `max_messages` queued messages to `on_message`.
    ///
    /// With `block` set, first sleeps until at least one message is queued.
    /// Returns the number of messages dispatched.
    #[instrument(skip(self), level = "trace")]
    pub fn update(&self, max_messages: usize, block: bool) -> usize {
        if block {
            self.shared.inbound.wait();
        }
        self.dispatch(max_messages)
    }

    /// Like [`Server::update`] but waits at most `timeout` for a first message.
    pub fn update_timeout(&self, max_messages: usize, timeout: Duration) -> usize {
        self.shared.inbound.wait_timeout(timeout);
        self.dispatch(max_messages)
    }

    /// Messages still queued from a client that has already been removed
    /// are dropped, so `on_message` never follows `on_client_disconnect`.
    /// Closed clients are pruned after the dispatch pass.
    fn dispatch(&self, max_messages: usize) -> usize {
        let mut count = 0;
        while count < max_messages {
            let Some(OwnedMessage { remote, msg }) = self.shared.inbound.pop_front() else {
                break;
            };
            count += 1;
            match remote {
                Some(client) if client.is_connected() || self.shared.is_pooled(&client) => {
                    self.handler.on_message(self, &client, msg)
                }
                Some(client) => trace!(id = client.id(), %msg, "Dropping message from removed client"),
                None => debug!(%msg, "Dropping message with no sender"),
            }
        }

        self.prune();
        count
    }

    /// Remove every closed client from the pool.
    fn prune(&self) {
        self.remove(|c| !c.is_connected());
    }

    /// Remove pooled clients matching `pred` and notify the handler for each.
    fn remove(&self, pred: impl Fn(&Arc<Connection<K>>) -> bool) {
        let removed: Vec<Arc<Connection<K>>> = {
            let mut pool = self.shared.pool.lock();
            let mut removed = Vec::new();
            pool.retain(|c| {
                if pred(c) {
                    removed.push(Arc::clone(c));
                    false
                } else {
                    true
                }
            });
            removed
        };

        for client in &removed {
            client.disconnect();
            info!(id = client.id(), peer = %client.peer_addr(), "Client removed");
            self.handler.on_client_disconnect(client);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.shared.pool.lock().len()
    }

    /// Snapshot of the pool.
    pub fn connections(&self) -> Vec<Arc<Connection<K>>> {
        self.shared.pool.lock().clone()
    }

    /// Messages waiting for the next `update`.
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<K>> {
        &self.shared.inbound
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl<K: MessageKind, H: ServerHandler<K>> Drop for Server<K, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept loop state, owned by the task on the I/O thread.
struct Acceptor<K: MessageKind, H: ServerHandler<K>> {
    handler: Arc<H>,
    shared: Arc<Shared<K>>,
    settings: ConnectionSettings,
    max_connections: usize,
}

impl<K: MessageKind, H: ServerHandler<K>> Acceptor<K, H> {
    async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) => {
                    global_metrics().connection_error();
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        info!(%peer, "New connection");

        if self.shared.occupied() >= self.max_connections {
            global_metrics().connection_denied();
            warn!(%peer, max = self.max_connections, "Connection limit reached, denying");
            return;
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Connection::new(id, Role::Server, peer);

        if !self.handler.on_client_connect(&client) {
            global_metrics().connection_denied();
            info!(id, %peer, "Connection denied");
            client.disconnect();
            return;
        }

        // The slot is released when the callback runs or, if the handshake
        // never succeeds, when the driver task drops it.
        let slot = HandshakeSlot::acquire(&self.shared);
        let handler = Arc::clone(&self.handler);
        let on_validated: ValidatedCallback<K> = Box::new(move |client| {
            slot.shared.pool.lock().push(Arc::clone(client));
            drop(slot);
            handler.on_client_validated(client);
        });

        client.start(
            stream,
            Arc::clone(&self.shared.inbound),
            self.settings.clone(),
            Some(on_validated),
        );
    }
}
