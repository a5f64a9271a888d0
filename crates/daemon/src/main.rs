//! gitdoc daemon entry point.
//!
//! Loads configuration, initializes logging, serves the document API and
//! shuts down gracefully on SIGINT/SIGTERM.

mod signals;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gitdoc_core::config::AppConfig;
use gitdoc_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// gitdoc HTTP daemon.
#[derive(Parser, Debug)]
#[command(
    name = "gitdoc-daemon",
    version,
    about = "Versioned, forkable, mergeable JSON documents over HTTP"
)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the storage root directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Override the listen address, e.g. 0.0.0.0:4567.
    #[arg(long)]
    listen: Option<String>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            AppConfig::load_from_file(path).context("failed to load configuration file")?
        }
        None => AppConfig::default(),
    };
    if let Some(root) = &args.root {
        config.storage.root_path = root.clone();
    }
    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if let Some(level) = &args.log_level {
        config.server.log_level = level.clone();
    }
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize tracing
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  gitdoc daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    if let Some(path) = &args.config {
        info!("Config file   : {}", path.display());
    }
    info!("Listen        : {}", config.server.listen);
    info!("Storage root  : {}", config.storage.root_path.display());
    info!("Default author: {}", config.storage.default_author);
    info!("Log level     : {}", config.server.log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.storage.root_path)
        .context("failed to create storage root directory")?;

    let listen_addr = config.server.listen.clone();
    let web_server = WebServer::new(config);
    web_server
        .start(&listen_addr, signals::wait_for_shutdown())
        .await
        .context("web server failed")?;

    info!("gitdoc daemon stopped.");
    Ok(())
}
