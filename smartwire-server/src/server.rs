//! TCP server implementation.

use crate::backing::Transport;
use crate::config::Config;
use crate::error::ServerError;
use crate::medium::ServerStreamMedium;
use crate::request::RequestRegistry;
use smartwire_protocol::{DEFAULT_PORT, MAX_READ_SIZE};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Size of each read issued against a connection.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 1000,
            read_buffer_size: MAX_READ_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the server settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            read_buffer_size: config.network.read_buffer_size(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP smart server.
pub struct Server {
    config: ServerConfig,
    registry: Arc<RequestRegistry>,
    transport: Arc<dyn Transport>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a server exposing the VFS commands over `transport`.
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_registry(config, transport, RequestRegistry::vfs())
    }

    /// Creates a server with a custom command set.
    pub fn with_registry(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        registry: RequestRegistry,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(registry),
            transport,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_listener(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server listening on {} ({})",
            listener.local_addr()?,
            if self.transport.is_readonly() {
                "read-only"
            } else {
                "read-write"
            }
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let registry = self.registry.clone();
                            let transport = self.transport.clone();
                            let stats = self.stats.clone();
                            let read_buffer_size = self.config.read_buffer_size;
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = tokio::select! {
                                    result = Self::handle_connection(
                                        tcp_stream,
                                        addr,
                                        registry,
                                        transport,
                                        stats.clone(),
                                        read_buffer_size,
                                    ) => result,
                                    _ = conn_shutdown.recv() => Err(ServerError::ShuttingDown),
                                };
                                if let Err(e) = result {
                                    tracing::debug!("Connection {} closed: {}", addr, e);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serves one TCP connection until the peer disconnects.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RequestRegistry>,
        transport: Arc<dyn Transport>,
        stats: Arc<ServerStats>,
        read_buffer_size: usize,
    ) -> Result<(), ServerError> {
        tracing::info!("Client connected: {}", addr);
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let mut medium = ServerStreamMedium::new(reader, writer, registry, transport)
            .with_read_buffer_size(read_buffer_size)
            .with_peer(addr.to_string())
            .with_stats(stats);
        medium.serve().await
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
