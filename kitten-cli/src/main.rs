//! kitten-cli - Command-line client for kitten RPC
//!
//! Calls methods on a running server and decodes captured frames offline.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use kitten_client::{Client, ConnectionConfig};
use kitten_protocol::DEFAULT_RPC_PATH;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kitten-cli")]
#[command(about = "Command-line client for the kitten RPC protocol")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7070", env = "KITTEN_SERVER")]
    server: SocketAddr,

    /// Path sent in the CONNECT request
    #[arg(short, long, default_value = DEFAULT_RPC_PATH, env = "KITTEN_RPC_PATH")]
    path: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send heartbeats and report round-trip times
    Ping {
        /// Number of heartbeats to send
        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Call a remote method
    Call {
        /// Method name, e.g. Kitten.Echo
        method: String,

        /// Request payload (UTF-8 text, or @file to read from file)
        payload: Option<String>,

        /// Treat the payload argument as hex
        #[arg(long)]
        hex: bool,

        /// Mark the payload as JSON and pretty-print the reply
        #[arg(long)]
        json: bool,

        /// Send as a one-way request and do not wait for a reply
        #[arg(long)]
        one_way: bool,
    },

    /// Decode a hex-encoded frame and print its contents
    Inspect {
        /// Frame bytes as hex
        frame: String,
    },

    /// Encode a request frame and print it as hex
    Encode {
        /// Method name
        method: String,

        /// Request payload (UTF-8 text)
        payload: Option<String>,

        /// Sequence number
        #[arg(long, default_value = "1")]
        seq: u64,

        /// Mark the request as one-way
        #[arg(long)]
        one_way: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Offline commands need no server connection
    let offline = match &cli.command {
        Commands::Inspect { frame } => Some(commands::inspect(frame)),
        Commands::Encode {
            method,
            payload,
            seq,
            one_way,
        } => Some(commands::encode(method, payload.as_deref(), *seq, *one_way)),
        _ => None,
    };
    if let Some(result) = offline {
        match result {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = ConnectionConfig::new(cli.server)
        .with_rpc_path(cli.path.clone())
        .with_request_timeout(Duration::from_secs(cli.timeout));
    let client = Client::new(config);

    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = commands::execute(&client, cli.command).await;

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    client.close().await?;
    Ok(())
}
