//! Shared helpers for the socket-level tests

#![allow(dead_code, clippy::unwrap_used)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use msgnet::config::ServerConfig;
use msgnet::protocol::handshake::client_response;
use msgnet::{Connection, Message, Server, ServerHandler};
use parking_lot::Mutex;

pub const PING: u32 = 1;
pub const MESSAGE_ALL: u32 = 2;
pub const SERVER_MESSAGE: u32 = 3;

pub const PATIENCE: Duration = Duration::from_secs(5);

/// Handler that records every hook and echoes pings.
pub struct Recorder {
    pub accept: AtomicBool,
    pub connects: AtomicUsize,
    pub validated: Mutex<Vec<u32>>,
    pub disconnected: Mutex<Vec<u32>>,
    pub received: Mutex<Vec<(u32, u32)>>,
}

impl Recorder {
    pub fn accepting() -> Self {
        Self {
            accept: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            validated: Mutex::new(Vec::new()),
            disconnected: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        }
    }
}

impl ServerHandler<u32> for Recorder {
    fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.accept.load(Ordering::SeqCst)
    }

    fn on_client_validated(&self, client: &Arc<Connection<u32>>) {
        self.validated.lock().push(client.id());
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<u32>>) {
        self.disconnected.lock().push(client.id());
    }

    fn on_message(&self, server: &Server<u32, Self>, client: &Arc<Connection<u32>>, msg: Message<u32>) {
        self.received.lock().push((client.id(), msg.kind()));
        match msg.kind() {
            PING => server.message_client(client, msg),
            MESSAGE_ALL => {
                let mut relay = Message::new(SERVER_MESSAGE);
                relay.push(client.id());
                server.message_all_clients(&relay, Some(client));
            }
            _ => {}
        }
    }
}

pub fn loopback_config() -> ServerConfig {
    let mut config = ServerConfig::with_port(0);
    config.address = "127.0.0.1:0".to_string();
    config
}

/// Start a server on an ephemeral loopback port.
pub fn start<H: ServerHandler<u32>>(config: ServerConfig, handler: H) -> (Server<u32, H>, u16) {
    let mut server = Server::with_config(config, handler);
    assert!(server.start(), "server failed to start");
    let port = server.local_addr().unwrap().port();
    (server, port)
}

/// Pump the server until `done` holds or `PATIENCE` runs out.
pub fn pump_until<H: ServerHandler<u32>>(server: &Server<u32, H>, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        server.update_timeout(usize::MAX, Duration::from_millis(10));
        if done() {
            return true;
        }
    }
    false
}

/// Poll `done` without touching any server.
pub fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Open a raw socket and run the client side of the handshake by hand.
pub fn raw_validated_socket(port: u16) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(PATIENCE)).unwrap();
    let mut nonce = [0u8; 8];
    stream.read_exact(&mut nonce).unwrap();
    stream.write_all(&client_response(nonce)).unwrap();
    stream
}

/// True once the peer has closed `stream`.
pub fn closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) => {
                return !matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                )
            }
        }
    }
}

/// Read the server's nonce, or `None` if the server closed the socket first.
pub fn try_read_nonce(stream: &mut TcpStream) -> Option<[u8; 8]> {
    let mut nonce = [0u8; 8];
    stream.read_exact(&mut nonce).ok().map(|_| nonce)
}
