//! sg200-collector - Topology collector for switches that only expose a web UI
//!
//! Logs into Cisco SG200 switches with a headless browser and into Netgear
//! routers over plain HTTP, and serves what it reads as JSON.

mod config;
mod error;
mod gatekeeper;
mod http;
mod models;
mod parser;
mod server;
mod session;
mod vendor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatekeeper::Gatekeeper;
use session::ChromeLauncher;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sg200-collector")]
#[command(about = "SG200 / Netgear topology collector", long_about = None)]
struct Args {
    /// Config file path (default: collector.toml, then standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Listen address, overrides [server].bind
    #[arg(short, long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Print the SHA-256 of a token for use as [security].token_sha256
    HashToken { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::HashToken { token }) = &args.command {
        println!("{}", gatekeeper::hash_token(token));
        return Ok(());
    }

    // Load configuration
    let cfg = config::Config::load(args.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("sg200-collector v{}", env!("CARGO_PKG_VERSION"));

    let gatekeeper = Gatekeeper::from_config(&cfg.security_or_env())
        .context("Invalid [security] configuration")?;
    if gatekeeper.is_open() {
        tracing::warn!(
            "No allowed_ips or token configured: every client can trigger extractions. \
             Only run this way on a trusted management network."
        );
    } else {
        tracing::info!(
            "Gatekeeper: ip allowlist {}, token {}",
            if gatekeeper.ip_gate_configured() { "on" } else { "off" },
            if gatekeeper.token_configured() { "on" } else { "off" }
        );
    }

    let opener = Arc::new(ChromeLauncher::new(cfg.browser.clone()));
    let state = server::AppState::new(gatekeeper, opener, &cfg);

    let bind = cfg.bind_address(args.bind.as_deref());
    server::serve(&bind, state).await
}
