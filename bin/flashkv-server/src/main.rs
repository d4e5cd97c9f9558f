//! FlashKV Server
//!
//! This binary fronts the storage engine with the newline-delimited TCP
//! protocol.

mod server;

use anyhow::Result;
use clap::Parser;
use flashkv_common::Config;
use flashkv_engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "flashkv-server")]
#[command(about = "FlashKV key-value store server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/flashkv/flashkv.toml")]
    config: String,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for disk shards
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Maximum cache entries before eviction triggers
    #[arg(long)]
    cache_size: Option<usize>,

    /// Seconds between background flush passes
    #[arg(long)]
    flush_interval: Option<f64>,

    /// Maximum concurrent disk I/O workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Maximum concurrent client connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Load the config file if present and layer CLI flags over it
fn load_config(args: &Args) -> Config {
    let mut config: Config = if std::path::Path::new(&args.config).exists() {
        match std::fs::read_to_string(&args.config) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|err| {
                eprintln!("Warning: Failed to parse config file: {err}");
                Config::default()
            }),
            Err(err) => {
                eprintln!("Warning: Failed to read config file: {err}");
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    if let Some(host) = &args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max_connections) = args.max_connections {
        config.server.max_connections = max_connections;
    }
    if let Some(data_dir) = &args.data_dir {
        config.engine.data_dir.clone_from(data_dir);
    }
    if let Some(cache_size) = args.cache_size {
        config.engine.cache_size = cache_size;
    }
    if let Some(flush_interval) = args.flush_interval {
        config.engine.flush_interval_secs = flush_interval;
    }
    if let Some(max_workers) = args.max_workers {
        config.engine.max_workers = max_workers;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FlashKV server");
    info!(
        data_dir = %config.engine.data_dir.display(),
        cache_size = config.engine.cache_size,
        flush_interval_secs = config.engine.flush_interval_secs,
        max_workers = config.engine.max_workers,
        "engine configuration"
    );

    let engine = match Engine::new(config.engine.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            error!("Failed to initialize engine: {err}");
            std::process::exit(1);
        }
    };
    engine.start();

    let listen = config.server.listen_addr();
    let listener = match TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind {listen}: {err}");
            std::process::exit(1);
        }
    };
    info!("FlashKV server listening on {listen}");

    tokio::select! {
        result = server::serve(listener, Arc::clone(&engine), config.server.max_connections) => {
            if let Err(err) = result {
                error!("accept loop failed: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    engine.stop().await?;
    info!("FlashKV server stopped");
    Ok(())
}
