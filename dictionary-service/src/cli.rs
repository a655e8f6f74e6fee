use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the dictionary over TCP.
    Server(ServerArgs),
    /// Connect to a dictionary server from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub listen: SocketAddr,

    /// JSON file with an array of words loaded at startup.
    #[arg(long)]
    pub seed: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the dictionary server.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub server: SocketAddr,

    /// How long `ping` waits for the server before reporting it unreachable.
    #[arg(long, default_value_t = 500)]
    pub probe_timeout_ms: u64,
}

impl ClientArgs {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
