//! Boundary conditions: impostor handshakes, denied and excess clients,
//! malformed frames.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use msgnet::core::message::MessageHeader;
use msgnet::protocol::handshake::{client_response, scramble};
use msgnet::utils::metrics::global_metrics;
use msgnet::{Client, Connection, Message, MessageKind, Server, ServerHandler};
use serial_test::serial;

#[test]
#[serial]
fn test_echoed_nonce_is_rejected() {
    let (server, port) = start(loopback_config(), Recorder::accepting());
    let failed_before = global_metrics().snapshot().handshakes_failed;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(PATIENCE)).unwrap();
    let mut nonce = [0u8; 8];
    stream.read_exact(&mut nonce).unwrap();
    stream.write_all(&nonce).unwrap();

    assert!(closed_by_peer(&mut stream));
    assert!(wait_until(|| {
        global_metrics().snapshot().handshakes_failed > failed_before
    }));
    assert_eq!(server.connection_count(), 0);
    assert!(server.handler().validated.lock().is_empty());
    assert_eq!(server.handler().connects.load(Ordering::SeqCst), 1);

    server.update(usize::MAX, false);
    assert!(server.handler().disconnected.lock().is_empty());
}

#[test]
fn test_scrambled_nonce_is_accepted() {
    let (server, port) = start(loopback_config(), Recorder::accepting());

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(PATIENCE)).unwrap();
    let mut nonce = [0u8; 8];
    stream.read_exact(&mut nonce).unwrap();

    let answer = scramble(u64::from_le_bytes(nonce));
    assert_eq!(answer.to_le_bytes(), client_response(nonce));
    stream.write_all(&answer.to_le_bytes()).unwrap();

    assert!(wait_until(|| server.connection_count() == 1));
}

#[test]
#[serial]
fn test_silent_peer_times_out() {
    let mut config = loopback_config();
    config.handshake_timeout = Duration::from_millis(100);
    let (server, port) = start(config, Recorder::accepting());

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(PATIENCE)).unwrap();
    let mut nonce = [0u8; 8];
    stream.read_exact(&mut nonce).unwrap();

    assert!(closed_by_peer(&mut stream));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_default_handler_denies_everyone() {
    struct Deny;
    impl ServerHandler<u32> for Deny {}

    let (server, port) = start(loopback_config(), Deny);
    let mut client = Client::<u32>::new();
    assert!(client.connect("127.0.0.1", port));

    assert!(wait_until(|| !client.is_connected()));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_hook_can_deny_before_handshake() {
    let recorder = Recorder::accepting();
    recorder.accept.store(false, Ordering::SeqCst);
    let (server, port) = start(loopback_config(), recorder);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(PATIENCE)).unwrap();
    assert!(closed_by_peer(&mut stream));

    assert_eq!(server.handler().connects.load(Ordering::SeqCst), 1);
    assert!(server.handler().validated.lock().is_empty());
}

#[test]
fn test_connection_limit_denies_excess_clients() {
    let mut config = loopback_config();
    config.max_connections = 1;
    let (server, port) = start(config, Recorder::accepting());

    let mut first = Client::<u32>::new();
    assert!(first.connect("127.0.0.1", port));
    assert!(wait_until(|| server.connection_count() == 1));

    let mut second = TcpStream::connect(("127.0.0.1", port)).unwrap();
    second.set_read_timeout(Some(PATIENCE)).unwrap();
    assert!(closed_by_peer(&mut second));

    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.handler().connects.load(Ordering::SeqCst), 1);
    assert!(first.is_connected());
}

#[test]
#[serial]
fn test_oversized_frame_closes_connection() {
    let mut config = loopback_config();
    config.transport.max_body_size = 1024;
    let (server, port) = start(config, Recorder::accepting());
    let errors_before = global_metrics().snapshot().protocol_errors;

    let mut stream = raw_validated_socket(port);
    assert!(wait_until(|| server.connection_count() == 1));

    let header = MessageHeader { kind: PING, body_size: 1_000_000 };
    stream.write_all(&header.to_bytes()).unwrap();

    assert!(closed_by_peer(&mut stream));
    assert!(pump_until(&server, || server.handler().disconnected.lock().len() == 1));
    assert!(server.handler().received.lock().is_empty());
    assert!(global_metrics().snapshot().protocol_errors > errors_before);
}

#[test]
fn test_concurrent_handshakes_respect_connection_limit() {
    let mut config = loopback_config();
    config.max_connections = 1;
    let (server, port) = start(config, Recorder::accepting());

    let mut sockets: Vec<TcpStream> = (0..3)
        .map(|_| {
            let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.set_read_timeout(Some(PATIENCE)).unwrap();
            stream
        })
        .collect();

    // Only one socket may be offered a nonce while the first handshake is pending.
    let nonces: Vec<_> = sockets.iter_mut().map(try_read_nonce).collect();
    assert_eq!(nonces.iter().filter(|n| n.is_some()).count(), 1);

    for (stream, nonce) in sockets.iter_mut().zip(&nonces) {
        if let Some(nonce) = nonce {
            let _ = stream.write_all(&client_response(*nonce));
        }
    }

    assert!(wait_until(|| server.connection_count() == 1));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.handler().validated.lock().len(), 1);
}

#[test]
fn test_failed_handshake_frees_its_slot() {
    let mut config = loopback_config();
    config.max_connections = 1;
    let (server, port) = start(config, Recorder::accepting());

    let mut impostor = TcpStream::connect(("127.0.0.1", port)).unwrap();
    impostor.set_read_timeout(Some(PATIENCE)).unwrap();
    let nonce = try_read_nonce(&mut impostor).unwrap();
    impostor.write_all(&nonce).unwrap();
    assert!(closed_by_peer(&mut impostor));

    // The slot is released as the impostor's driver winds down, so retry
    // until the genuine client is admitted.
    let mut client = Client::<u32>::new();
    assert!(wait_until(|| {
        client.connect("127.0.0.1", port);
        wait_until(|| server.connection_count() == 1 || !client.is_connected());
        server.connection_count() == 1
    }));
    assert_eq!(server.handler().validated.lock().len(), 1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strict {
    Only,
}

impl MessageKind for Strict {
    fn to_wire(self) -> u32 {
        0
    }

    fn from_wire(raw: u32) -> Option<Self> {
        (raw == 0).then_some(Strict::Only)
    }
}

struct StrictHandler;

impl ServerHandler<Strict> for StrictHandler {
    fn on_client_connect(&self, _client: &Arc<Connection<Strict>>) -> bool {
        true
    }

    fn on_message(&self, server: &Server<Strict, Self>, client: &Arc<Connection<Strict>>, msg: Message<Strict>) {
        server.message_client(client, msg);
    }
}

#[test]
fn test_unknown_kind_closes_connection() {
    let mut server = Server::with_config(loopback_config(), StrictHandler);
    assert!(server.start());
    let port = server.local_addr().unwrap().port();

    let mut stream = raw_validated_socket(port);
    assert!(wait_until(|| server.connection_count() == 1));

    let mut frame = 99u32.to_le_bytes().to_vec();
    frame.extend_from_slice(&0u32.to_le_bytes());
    stream.write_all(&frame).unwrap();

    assert!(closed_by_peer(&mut stream));
    assert!(wait_until(|| server.connections().iter().all(|c| !c.is_connected())));
    server.update(usize::MAX, false);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_empty_body_frame_is_delivered() {
    let (server, port) = start(loopback_config(), Recorder::accepting());
    let mut stream = raw_validated_socket(port);

    let header = MessageHeader { kind: 55u32, body_size: 0 };
    stream.write_all(&header.to_bytes()).unwrap();

    assert!(pump_until(&server, || !server.handler().received.lock().is_empty()));
    assert_eq!(server.handler().received.lock()[0].1, 55);
}
