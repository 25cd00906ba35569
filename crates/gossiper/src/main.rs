//! # Gossiper
//!
//! Runs one member of a gossip-based membership cluster. The node starts
//! its engine, optionally joins an existing member, prints the members it
//! knows about, then runs until interrupted and leaves gracefully.
//!
//! ## Lifecycle
//! ```text
//! config → create (bind engine) → attach Ctrl+C handler → join? → print members
//!                                          ↓
//!                              Ctrl+C → leave → shutdown → wait returns
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod node;
mod shutdown;

use crate::config::AppConfig;
use gossiper_membership::UdpMembership;
use node::Gossiper;
use shutdown::{CtrlC, attach_shutdown_handler};

/// Gossiper - cluster membership node
#[derive(Parser, Debug)]
#[command(name = "gossiper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/gossiper.toml")]
    config: String,

    /// UDP address for gossip, host[:port] (default 127.0.0.1:7000)
    #[arg(short, long)]
    bind: Option<String>,

    /// Address of a member to join, e.g. 127.0.0.1:7000
    #[arg(short, long)]
    join: Option<String>,

    /// Node name (defaults to the hostname)
    #[arg(short, long)]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting gossiper v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, &args)?;

    let interrupts = CtrlC::register()
        .inspect_err(|e| error!(error = %e, "Failed to register interrupt handler"))
        .context("Failed to register interrupt handler")?;

    let node_config = config
        .node_config()
        .inspect_err(|e| error!(bind = %config.bind_addr, error = %e, "Invalid bind address"))
        .context("Invalid configuration")?;

    let gossiper = Gossiper::<UdpMembership>::create(node_config)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to create node"))
        .context("Failed to start membership engine")?;

    info!(
        node = %gossiper.name(),
        bind = %gossiper.bind_address(),
        addr = %gossiper.engine().local_addr(),
        "Gossip listening"
    );

    let _signal_handler = attach_shutdown_handler(gossiper.clone(), interrupts);

    if let Some(ref peer) = config.join {
        gossiper.join(peer).await;
    }

    gossiper.print_members();

    gossiper.wait().await;

    info!(state = ?gossiper.state(), "Gossiper stopped");
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
