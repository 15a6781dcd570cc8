//! Server medium: drives server protocols over one byte-stream connection.

use crate::backing::Transport;
use crate::error::ServerError;
use crate::protocol::ServerProtocol;
use crate::request::RequestRegistry;
use crate::server::ServerStats;
use bytes::BytesMut;
use smartwire_protocol::MAX_READ_SIZE;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serves requests from `reader`, writing responses to `writer`.
///
/// Works over any split stream: a TCP connection, stdin/stdout, or an
/// in-process duplex pipe.
pub struct ServerStreamMedium<R, W> {
    reader: R,
    writer: W,
    registry: Arc<RequestRegistry>,
    transport: Arc<dyn Transport>,
    push_back: BytesMut,
    read_buf: Vec<u8>,
    finished: bool,
    peer: String,
    stats: Option<Arc<ServerStats>>,
}

impl<R, W> ServerStreamMedium<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        registry: Arc<RequestRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            reader,
            writer,
            registry,
            transport,
            push_back: BytesMut::new(),
            read_buf: vec![0u8; MAX_READ_SIZE],
            finished: false,
            peer: "stream".to_string(),
            stats: None,
        }
    }

    /// Sets the size of each read from the connection.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buf = vec![0u8; size.max(1)];
        self
    }

    /// Label used in log lines.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn with_stats(mut self, stats: Arc<ServerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Whether the peer has gone away.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Serves requests until the peer closes the stream.
    ///
    /// An error is returned after the connection has been shut down.
    pub async fn serve(&mut self) -> Result<(), ServerError> {
        while !self.finished {
            let mut protocol = ServerProtocol::new(self.registry.clone(), self.transport.clone());
            if let Err(e) = self.serve_one_request(&mut protocol).await {
                self.terminate_due_to_error(&e).await;
                return Err(e);
            }
        }
        let _ = self.writer.shutdown().await;
        Ok(())
    }

    async fn serve_one_request(&mut self, protocol: &mut ServerProtocol) -> Result<(), ServerError> {
        while protocol.next_read_size() > 0 {
            let result = if !self.push_back.is_empty() {
                let bytes = self.push_back.split();
                protocol.accept_bytes(&bytes)
            } else {
                // The hint is a lower bound; over-reads become push-back.
                let n = self.reader.read(&mut self.read_buf).await?;
                if n == 0 {
                    self.finished = true;
                    if protocol.is_idle() {
                        tracing::debug!(peer = %self.peer, "peer closed the stream");
                        return Ok(());
                    }
                    return Err(ServerError::ConnectionClosed);
                }
                tracing::trace!(peer = %self.peer, bytes = n, "read");
                protocol.accept_bytes(&self.read_buf[..n])
            };
            self.write_output(protocol).await?;
            result?;
        }

        self.push_back.unsplit(protocol.take_excess());
        if let Some(stats) = &self.stats {
            stats.requests_total.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn write_output(&mut self, protocol: &mut ServerProtocol) -> Result<(), ServerError> {
        let output = protocol.take_output();
        if output.is_empty() {
            return Ok(());
        }
        tracing::trace!(peer = %self.peer, bytes = output.len(), "write");
        self.writer.write_all(&output).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Closes the connection after an unrecoverable error.
    async fn terminate_due_to_error(&mut self, err: &ServerError) {
        tracing::warn!(peer = %self.peer, error = %err, "terminating connection");
        if let Some(stats) = &self.stats {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.writer.shutdown().await;
        self.finished = true;
    }
}
