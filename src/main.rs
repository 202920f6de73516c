//! LanChat - LAN chat over UDP broadcast
//!
//! Finds peers on the local network and exchanges short text messages with them.

mod config;
mod discovery;
mod dispatch;
mod network;
mod node;
mod protocol;
mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use discovery::DiscoveryEvent;
use network::{TransportEvent, UdpGateway};
use node::Node;
use protocol::Packet;
use store::{Direction, JsonlStore, MessageStore, SaveReport, StoredMessage};

/// LanChat - LAN chat over UDP broadcast
#[derive(Parser)]
#[command(name = "lanchat")]
#[command(author = "LanChat Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Discover peers and chat over the local network", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer discovery probes and receive messages until Ctrl+C
    Listen {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Broadcast a discovery probe and list the peers that answer
    Discover {
        /// How long to collect replies (milliseconds)
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send one text message to a peer
    Send {
        /// Peer host name or address
        host: String,

        /// Message text
        message: String,

        /// Peer port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show stored message history
    History {
        /// Only messages exchanged with this peer
        #[arg(long)]
        peer: Option<String>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Listen { port } => {
            run_listen(config, port).await?;
        }
        Commands::Discover { timeout_ms, json } => {
            run_discovery(config, timeout_ms, json).await?;
        }
        Commands::Send {
            host,
            message,
            port,
        } => {
            run_send(config, host, message, port).await?;
        }
        Commands::History { peer } => {
            print_history(&config, peer.as_deref()).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Arc<JsonlStore> {
    Arc::new(JsonlStore::new(config.storage.path.clone()))
}

/// Run a peer until Ctrl+C
async fn run_listen(mut config: Config, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.network.port = port;
    }

    let store = open_store(&config);
    let mut node = Node::start(&config, store.clone()).await?;

    let mut transport_rx = node
        .take_transport_events()
        .ok_or_else(|| anyhow::anyhow!("transport events already taken"))?;
    let mut report_rx = node
        .take_save_reports()
        .ok_or_else(|| anyhow::anyhow!("save reports already taken"))?;

    println!("\n========================================");
    println!("  LanChat Listening");
    println!("========================================");
    println!("  Name: {}", config.general.name);
    println!("  Address: {}", node.local_addr());
    println!("  History: {}", store.path().display());
    println!("========================================");
    println!("\nWaiting for messages...");
    println!("Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(report) = report_rx.recv() => {
                match report {
                    SaveReport::Saved { message } => {
                        println!("[{}] {}", message.sender, message.content);
                    }
                    SaveReport::Failed { message, error } => {
                        tracing::error!("Message from {} not saved: {}", message.sender, error);
                        println!("[{}] {} (not saved)", message.sender, message.content);
                    }
                }
            }
            Some(event) = transport_rx.recv() => {
                match event {
                    TransportEvent::ForeignDatagram { sender, payload } => {
                        tracing::debug!("Ignored {} non-LanChat bytes from {}", payload.len(), sender);
                    }
                    TransportEvent::Error { message } => {
                        tracing::warn!("{}", message);
                    }
                    TransportEvent::Started { local_addr } => {
                        tracing::debug!("Receive loop running on {}", local_addr);
                    }
                    TransportEvent::Stopped => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    node.stop().await?;
    tracing::info!("Listener stopped");

    Ok(())
}

/// Run one discovery scan
async fn run_discovery(mut config: Config, timeout_ms: Option<u64>, json: bool) -> anyhow::Result<()> {
    if let Some(timeout_ms) = timeout_ms {
        config.network.discovery_window_ms = timeout_ms;
    }

    let mut node = Node::start(&config, open_store(&config)).await?;

    let mut event_rx = node
        .discovery_mut()
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("discovery events already taken"))?;

    if !json {
        println!(
            "Scanning for LanChat peers ({} ms)...\n",
            config.network.discovery_window_ms
        );
    }

    let outcome = {
        let scan = node.discovery().discover();
        tokio::pin!(scan);

        loop {
            tokio::select! {
                result = &mut scan => break result?,
                Some(event) = event_rx.recv() => {
                    if let DiscoveryEvent::PeerDiscovered(ip) = event {
                        if !json {
                            println!("+ {}", ip);
                        }
                    }
                }
            }
        }
    };

    if json {
        let peers: Vec<String> = outcome.peers.iter().map(|ip| ip.to_string()).collect();
        let report = serde_json::json!({
            "found": outcome.found(),
            "peers": peers,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if outcome.found() {
        println!("\nDiscovery complete: {} peer(s).", outcome.peers.len());
    } else {
        println!("No peers found on the network.");
    }

    node.stop().await?;
    Ok(())
}

/// Send a single message without starting a listener
async fn run_send(config: Config, host: String, message: String, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.network.port);

    if protocol::declared_text_length(&message) as usize != message.len() {
        tracing::warn!(
            "Message is longer than {} bytes or not ASCII; the receiver may see it truncated",
            protocol::MAX_TEXT_LEN
        );
    }

    let store = open_store(&config);
    let destination = send_and_record(&UdpGateway::new(), store.as_ref(), &host, port, &message).await?;

    println!("Sent to {} ({})", host, destination);
    Ok(())
}

/// Send one text message and log it under the peer's IP, as received messages are
async fn send_and_record(
    gateway: &UdpGateway,
    store: &dyn MessageStore,
    host: &str,
    port: u16,
    message: &str,
) -> anyhow::Result<SocketAddr> {
    let destination = gateway
        .send_to_host(host, port, &Packet::text(message))
        .await?;

    let peer = destination.ip().to_string();
    if let Err(e) = store.save_message(&StoredMessage::sent(peer, message)).await {
        tracing::warn!("Could not record sent message: {}", e);
    }

    Ok(destination)
}

/// Print stored messages
async fn print_history(config: &Config, peer: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(config);
    let messages = store.load().await?;

    for message in messages
        .iter()
        .filter(|m| peer.map_or(true, |p| m.sender == p))
    {
        let arrow = match message.direction {
            Direction::Received => "<-",
            Direction::Sent => "->",
        };
        println!("{} {} {} {}", message.timestamp, arrow, message.sender, message.content);
    }

    Ok(())
}
