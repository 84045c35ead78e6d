//! Sieve forward proxy (v1)
//!
//! An HTTP/1.0 forward proxy that can serve and populate a disk cache and
//! censor blocklisted words in text responses.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                ┌──────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ net::listener ─▶ http::server              │
//!                           │                      │                       │
//!                           │                      ▼                       │
//!                           │                 http::handler ──▶ cache ─────┼─▶ .proxy-cache/
//!                           │                      │        (revalidate)   │
//!                           │                      ▼                       │
//!                           │     origin ─▶ http::forward ─▶ censor        │
//!     ◀─────────────────────┼──────────────────────┘                       │
//!                           │                                              │
//!                           │  config · lifecycle · observability          │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use sieve_proxy::config::loader::load_config;
use sieve_proxy::config::ProxyConfig;
use sieve_proxy::lifecycle::{signals, startup, Shutdown};
use sieve_proxy::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "sieve-proxy")]
#[command(about = "HTTP/1.0 forward proxy with disk caching and censoring", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (keeps the configured bind host)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve and populate the disk cache
    #[arg(long, conflicts_with = "no_cache")]
    cache: bool,

    #[arg(long)]
    no_cache: bool,

    /// Censor blocklisted words in text responses
    #[arg(long, conflicts_with = "no_censor")]
    censor: bool,

    #[arg(long)]
    no_censor: bool,

    /// Cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Blocklist file, one word per line
    #[arg(long)]
    blocklist: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.set_port(port);
        }
        if self.cache {
            config.cache.enabled = true;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if self.censor {
            config.censor.enabled = true;
        }
        if self.no_censor {
            config.censor.enabled = false;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.directory = dir.clone();
        }
        if let Some(path) = &self.blocklist {
            config.censor.blocklist_path = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_tracing(&config.observability.log_level);
    tracing::info!("sieve-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        cache = config.cache.enabled,
        censor = config.censor.enabled,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    startup::run(config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
