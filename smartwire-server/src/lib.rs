//! # smartwire-server
//!
//! Smart server for the version-1 wire protocol.
//!
//! This crate provides:
//! - Backing transports (local filesystem, in-memory, read-only decorator)
//! - The request registry and the VFS command handlers
//! - The per-request server protocol state machine
//! - A stream medium that serves any split async byte stream
//! - A TCP server with connection limits and statistics

pub mod backing;
pub mod config;
pub mod error;
pub mod medium;
pub mod protocol;
pub mod request;
pub mod server;
pub mod vfs;

pub use backing::{LocalTransport, MemoryTransport, ReadOnlyTransport, Transport};
pub use config::{Config, ConfigError, NetworkConfig, ServeConfig};
pub use error::ServerError;
pub use medium::ServerStreamMedium;
pub use protocol::ServerProtocol;
pub use request::{Dispatch, RequestHandler, RequestRegistry};
pub use server::{Server, ServerConfig, ServerStats};
pub use vfs::{VfsHandler, VfsMethod};

use std::sync::Arc;

/// Builds the backing transport described by the serving configuration.
///
/// Unless writes are allowed the transport rejects every mutation.
pub fn backing_transport(config: &ServeConfig) -> Arc<dyn Transport> {
    let local: Arc<dyn Transport> = Arc::new(LocalTransport::new(&config.directory));
    if config.allow_writes {
        local
    } else {
        Arc::new(ReadOnlyTransport::new(local))
    }
}
