use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

use crate::server::{DEFAULT_OUTBOX_CAPACITY, ServerConfig};

/// Relay every line a client sends to all other connected clients.
#[derive(Parser, Debug, Clone)]
#[command(name = "group-chat-server", author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Address of the interface to listen on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Lines queued per client before further lines to that client are dropped.
    #[arg(
        long,
        default_value_t = DEFAULT_OUTBOX_CAPACITY,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub outbox_capacity: usize,
}

impl ServerArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            outbox_capacity: self.outbox_capacity,
        }
    }
}

/// Join a group chat relay from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "group-chat-client", author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Host name or address of the relay.
    pub host: String,

    /// Port of the relay.
    pub port: u16,

    /// Display name sent on connect. Without it, the first typed line is the name.
    #[arg(long)]
    pub name: Option<String>,
}
