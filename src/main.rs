//! smartwire - smart server for the version-1 wire protocol
//!
//! Serves a directory over TCP, or over stdin/stdout for SSH-started
//! sessions.

use clap::{Parser, Subcommand};
use smartwire_server::{
    backing_transport, Config, RequestRegistry, Server, ServerConfig, ServerStreamMedium,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smartwire")]
#[command(about = "Smart server for the version-1 wire protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory to smart clients
    Serve {
        /// Serve one connection on stdin/stdout
        #[arg(long, conflicts_with = "port")]
        inet: bool,

        /// Listen address, [HOST:]PORT
        #[arg(long, value_name = "ADDR")]
        port: Option<String>,

        /// Directory to serve
        #[arg(long)]
        directory: Option<PathBuf>,

        /// Allow clients to modify files
        #[arg(long)]
        allow_writes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let Commands::Serve {
        inet,
        port,
        directory,
        allow_writes,
    } = cli.command;

    // Logs go to stderr: stdout carries the protocol in inet mode.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (from file if SMARTWIRE_CONFIG is set, then env overrides)
    let mut config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("SMARTWIRE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("SMARTWIRE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Some(directory) = directory {
        config.serve.directory = directory;
    }
    if allow_writes {
        config.serve.allow_writes = true;
    }
    if let Some(port) = port {
        config.network.bind_addr = parse_listen_addr(&port, config.network.bind_addr)?;
    }

    let transport = backing_transport(&config.serve);

    if inet {
        tracing::debug!(
            "Serving {} on stdin/stdout ({})",
            config.serve.directory.display(),
            if config.serve.allow_writes {
                "read-write"
            } else {
                "read-only"
            }
        );
        let mut medium = ServerStreamMedium::new(
            tokio::io::stdin(),
            tokio::io::stdout(),
            Arc::new(RequestRegistry::vfs()),
            transport,
        )
        .with_read_buffer_size(config.network.read_buffer_size())
        .with_peer("inet");
        medium.serve().await?;
        return Ok(());
    }

    tracing::info!("Starting smartwire server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Directory: {}", config.serve.directory.display());
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let server = Arc::new(Server::new(ServerConfig::from_config(&config), transport));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Parses `HOST:PORT`, or a bare port bound on the configured host.
fn parse_listen_addr(arg: &str, default: SocketAddr) -> Result<SocketAddr, String> {
    if let Ok(port) = arg.parse::<u16>() {
        return Ok(SocketAddr::new(default.ip(), port));
    }
    arg.parse()
        .map_err(|_| format!("invalid listen address: {}", arg))
}
