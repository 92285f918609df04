//! msgnet demo binary
//!
//! `server` echoes pings and relays broadcasts; `client` pings a server and
//! reports the round-trip time.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use msgnet::config::NetworkConfig;
use msgnet::utils::logging::init_logging;
use msgnet::utils::metrics::global_metrics;
use msgnet::{Client, Connection, Message, MessageKind, Server, ServerHandler};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    ServerAccept,
    ServerDeny,
    Ping,
    MessageAll,
    ServerMessage,
}

impl MessageKind for Kind {
    fn to_wire(self) -> u32 {
        self as u32
    }

    fn from_wire(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Kind::ServerAccept,
            1 => Kind::ServerDeny,
            2 => Kind::Ping,
            3 => Kind::MessageAll,
            4 => Kind::ServerMessage,
            _ => return None,
        })
    }
}

/// msgnet demo
#[derive(Parser, Debug)]
#[command(name = "msgnet-demo")]
#[command(about = "Ping/broadcast demo for the msgnet transport")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an echo/broadcast server
    Server {
        /// Port to listen on
        #[arg(short, long, default_value = "60000")]
        port: u16,
    },
    /// Connect and ping a server
    Client {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, default_value = "60000")]
        port: u16,

        /// Number of pings to send
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,

        /// Send one broadcast after the pings
        #[arg(short, long)]
        broadcast: bool,
    },
}

struct Relay;

impl ServerHandler<Kind> for Relay {
    fn on_client_connect(&self, _client: &Arc<Connection<Kind>>) -> bool {
        true
    }

    fn on_client_validated(&self, client: &Arc<Connection<Kind>>) {
        client.send(Message::new(Kind::ServerAccept));
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<Kind>>) {
        info!(id = client.id(), "Removing client");
    }

    fn on_message(&self, server: &Server<Kind, Self>, client: &Arc<Connection<Kind>>, msg: Message<Kind>) {
        match msg.kind() {
            Kind::Ping => {
                info!(id = client.id(), "Server ping");
                server.message_client(client, msg);
            }
            Kind::MessageAll => {
                info!(id = client.id(), "Message all");
                let mut relay = Message::new(Kind::ServerMessage);
                relay.push(client.id());
                server.message_all_clients(&relay, Some(client));
            }
            other => warn!(id = client.id(), kind = ?other, "Unexpected message"),
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

fn run_server(config: NetworkConfig, port: u16) -> i32 {
    let mut server_config = config.server;
    server_config.address = format!("0.0.0.0:{port}");

    let mut server = Server::with_config(server_config, Relay);
    if !server.start() {
        return 1;
    }

    loop {
        server.update(usize::MAX, true);
    }
}

fn run_client(config: NetworkConfig, host: &str, port: u16, count: u32, broadcast: bool) -> i32 {
    let mut client = Client::<Kind>::with_config(config.client);
    if !client.connect(host, port) {
        return 1;
    }

    let mut pongs = 0;
    let mut sent = 0;
    while pongs < count {
        if sent == pongs {
            let mut ping = Message::new(Kind::Ping);
            ping.push(now_micros());
            client.send(ping);
            sent += 1;
        }

        if !client.incoming().wait_timeout(Duration::from_secs(2)) {
            if !client.is_connected() {
                error!("Server closed the connection");
                return 1;
            }
            continue;
        }

        while let Some(owned) = client.incoming().pop_front() {
            let mut msg = owned.msg;
            match msg.kind() {
                Kind::ServerAccept => info!("Server accepted connection"),
                Kind::ServerDeny => warn!("Server denied connection"),
                Kind::Ping => match msg.pop::<u64>() {
                    Ok(then) => {
                        pongs += 1;
                        let rtt = now_micros().saturating_sub(then);
                        info!(rtt_us = rtt, "Ping: {:.3}ms", rtt as f64 / 1000.0);
                    }
                    Err(e) => warn!(error = %e, "Malformed ping reply"),
                },
                Kind::ServerMessage => match msg.pop::<u32>() {
                    Ok(from) => info!(from, "Hello from client"),
                    Err(e) => warn!(error = %e, "Malformed relay"),
                },
                Kind::MessageAll => {}
            }
        }
    }

    if broadcast {
        client.send(Message::new(Kind::MessageAll));
        std::thread::sleep(Duration::from_millis(100));
    }

    client.disconnect();
    global_metrics().log_metrics();
    0
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => NetworkConfig::from_file(path),
        None => NetworkConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }
    info!("msgnet demo v{}", msgnet::VERSION);

    let code = match args.command {
        Command::Server { port } => run_server(config, port),
        Command::Client {
            host,
            port,
            count,
            broadcast,
        } => run_client(config, &host, port, count, broadcast),
    };
    std::process::exit(code);
}
