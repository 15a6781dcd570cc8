//! Client mediums and the per-call request object.
//!
//! A `ClientMedium` owns one byte-stream connection (TCP socket, SSH
//! session or pre-opened pipe pair) and hands out one `ClientRequest` at a
//! time. TCP and SSH mediums connect on first write.

use crate::error::ClientError;
use crate::stream::{MediumStream, PipeReader, PipeWriter};
use bytes::{Bytes, BytesMut};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

/// Default read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Arguments the remote executable is started with over SSH.
pub const REMOTE_SERVE_ARGS: [&str; 4] = ["serve", "--inet", "--directory=/", "--allow-writes"];

/// Medium configuration.
#[derive(Debug, Clone)]
pub struct MediumConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Size of each read from the connection.
    pub read_buffer_size: usize,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl MediumConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// How to reach a server over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshParams {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    /// Local ssh client (`SMARTWIRE_SSH`, default `ssh`).
    pub ssh_program: String,
    /// Server executable on the remote host (`SMARTWIRE_REMOTE_PATH`,
    /// default `smartwire`).
    pub remote_path: String,
}

impl SshParams {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: None,
            ssh_program: std::env::var("SMARTWIRE_SSH").unwrap_or_else(|_| "ssh".to_string()),
            remote_path: std::env::var("SMARTWIRE_REMOTE_PATH")
                .unwrap_or_else(|_| "smartwire".to_string()),
        }
    }

    /// Parses `[user@]host[:port]`.
    pub fn parse(target: &str) -> Result<Self, ClientError> {
        let (username, rest) = match target.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(ClientError::InvalidPath(target.to_string())),
            None => (None, target),
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ClientError::InvalidPath(target.to_string()))?;
                (host, Some(port))
            }
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(ClientError::InvalidPath(target.to_string()));
        }
        let mut params = Self::new(host);
        params.port = port;
        params.username = username;
        Ok(params)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = path.into();
        self
    }

    /// Arguments passed to the ssh program.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-oForwardX11=no".to_string(),
            "-oForwardAgent=no".to_string(),
            "-oClearAllForwardings=yes".to_string(),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(user) = &self.username {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args.push(self.host.clone());
        args.push(self.remote_path.clone());
        args.extend(REMOTE_SERVE_ARGS.iter().map(|a| a.to_string()));
        args
    }
}

enum MediumKind {
    Pipe,
    Ssh(SshParams),
    Tcp(String),
}

enum ConnectionState {
    Disconnected,
    Connected(MediumStream),
}

/// One client-side connection, serving one request at a time.
pub struct ClientMedium {
    kind: MediumKind,
    config: MediumConfig,
    state: ConnectionState,
    read_buf: BytesMut,
    request_outstanding: bool,
}

impl ClientMedium {
    /// Wraps an already open pipe pair. The medium never reconnects it.
    pub fn pipe<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: PipeReader = Box::new(reader);
        let writer: PipeWriter = Box::new(writer);
        Self::with_state(
            MediumKind::Pipe,
            ConnectionState::Connected(MediumStream::Pipe { reader, writer }),
        )
    }

    /// A medium that connects to `addr` (`host:port`) on first use.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::with_state(MediumKind::Tcp(addr.into()), ConnectionState::Disconnected)
    }

    /// A medium that starts the server over SSH on first use.
    pub fn ssh(params: SshParams) -> Self {
        Self::with_state(MediumKind::Ssh(params), ConnectionState::Disconnected)
    }

    fn with_state(kind: MediumKind, state: ConnectionState) -> Self {
        Self {
            kind,
            config: MediumConfig::default(),
            state,
            read_buf: BytesMut::new(),
            request_outstanding: false,
        }
    }

    pub fn with_config(mut self, config: MediumConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Whether a request was issued and has not finished reading.
    pub fn has_outstanding_request(&self) -> bool {
        self.request_outstanding
    }

    /// Starts a new request.
    ///
    /// Fails with `TooManyConcurrentRequests`, leaving the medium untouched,
    /// if the previous request never reached its done state.
    pub fn get_request(&mut self) -> Result<ClientRequest<'_>, ClientError> {
        if self.request_outstanding {
            return Err(ClientError::TooManyConcurrentRequests);
        }
        self.request_outstanding = true;
        Ok(ClientRequest {
            medium: self,
            state: RequestState::Writing,
        })
    }

    /// Closes the connection. Calling it again is a no-op.
    pub async fn disconnect(&mut self) {
        if let ConnectionState::Connected(stream) =
            std::mem::replace(&mut self.state, ConnectionState::Disconnected)
        {
            tracing::debug!("closing {} medium", stream.kind());
            stream.close().await;
        }
        self.read_buf.clear();
        self.request_outstanding = false;
    }

    /// Drops a broken connection without a graceful close.
    fn drop_connection(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.read_buf.clear();
        self.request_outstanding = false;
    }

    async fn ensure_connected(&mut self) -> Result<&mut MediumStream, ClientError> {
        if matches!(self.state, ConnectionState::Disconnected) {
            let stream = self.connect().await?;
            self.state = ConnectionState::Connected(stream);
        }
        match &mut self.state {
            ConnectionState::Connected(stream) => Ok(stream),
            ConnectionState::Disconnected => Err(ClientError::MediumNotConnected),
        }
    }

    async fn connect(&self) -> Result<MediumStream, ClientError> {
        match &self.kind {
            MediumKind::Pipe => Err(ClientError::MediumNotConnected),
            MediumKind::Tcp(addr) => {
                tracing::debug!("Connecting to {}", addr);
                let stream = tokio::time::timeout(
                    self.config.connect_timeout,
                    TcpStream::connect(addr.as_str()),
                )
                .await
                .map_err(|_| ClientError::Timeout(addr.clone()))?
                .map_err(|source| ClientError::ConnectFailed {
                    addr: addr.clone(),
                    source,
                })?;
                stream.set_nodelay(true)?;
                tracing::info!("Connected to {}", addr);
                Ok(MediumStream::Tcp { stream })
            }
            MediumKind::Ssh(params) => {
                tracing::debug!(
                    "Starting {} {}",
                    params.ssh_program,
                    params.command_args().join(" ")
                );
                let connect_failed = |source: io::Error| ClientError::ConnectFailed {
                    addr: params.host.clone(),
                    source,
                };
                let mut child = Command::new(&params.ssh_program)
                    .args(params.command_args())
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(connect_failed)?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    connect_failed(io::Error::new(io::ErrorKind::BrokenPipe, "no ssh stdin"))
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    connect_failed(io::Error::new(io::ErrorKind::BrokenPipe, "no ssh stdout"))
                })?;
                tracing::info!("SSH session to {} started", params.host);
                Ok(MediumStream::Ssh {
                    child,
                    stdin,
                    stdout,
                })
            }
        }
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let stream = self.ensure_connected().await?;
        stream.write_all(bytes).await?;
        tracing::trace!(bytes = bytes.len(), "write");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        if let ConnectionState::Connected(stream) = &mut self.state {
            stream.flush().await?;
        }
        Ok(())
    }

    /// Returns up to `count` bytes; empty at end of stream.
    async fn read_bytes(&mut self, count: usize) -> Result<Bytes, ClientError> {
        if self.read_buf.is_empty() && count > 0 {
            let stream = match &mut self.state {
                ConnectionState::Connected(stream) => stream,
                ConnectionState::Disconnected => return Err(ClientError::MediumNotConnected),
            };
            self.read_buf.reserve(self.config.read_buffer_size);
            let n = stream.read_buf(&mut self.read_buf).await?;
            tracing::trace!(bytes = n, "read");
            if n == 0 {
                return Ok(Bytes::new());
            }
        }
        let take = count.min(self.read_buf.len());
        Ok(self.read_buf.split_to(take).freeze())
    }
}

/// Lifecycle of a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Writing,
    Reading,
    Done,
}

/// One call on a medium: write the request, then read the response.
pub struct ClientRequest<'m> {
    medium: &'m mut ClientMedium,
    state: RequestState,
}

impl<'m> ClientRequest<'m> {
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Writes request bytes.
    pub async fn accept_bytes(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        if self.state != RequestState::Writing {
            return Err(ClientError::WritingCompleted);
        }
        let result = self.medium.write_bytes(bytes).await;
        self.check(result)
    }

    /// Flushes the request and switches to reading.
    pub async fn finished_writing(&mut self) -> Result<(), ClientError> {
        if self.state != RequestState::Writing {
            return Err(ClientError::WritingCompleted);
        }
        let result = self.medium.flush().await;
        self.check(result)?;
        self.state = RequestState::Reading;
        Ok(())
    }

    /// Reads up to `count` response bytes; empty at end of stream.
    pub async fn read_bytes(&mut self, count: usize) -> Result<Bytes, ClientError> {
        match self.state {
            RequestState::Writing => Err(ClientError::WritingNotComplete),
            RequestState::Done => Err(ClientError::ReadingCompleted),
            RequestState::Reading => {
                let result = self.medium.read_bytes(count).await;
                self.check(result)
            }
        }
    }

    /// Ends the request and releases the medium.
    pub fn finished_reading(&mut self) -> Result<(), ClientError> {
        match self.state {
            RequestState::Writing => Err(ClientError::WritingNotComplete),
            RequestState::Done => Err(ClientError::ReadingCompleted),
            RequestState::Reading => {
                self.state = RequestState::Done;
                self.medium.request_outstanding = false;
                Ok(())
            }
        }
    }

    /// Ends the request and drops the connection when `result` is an error
    /// that leaves the stream at an unknown position.
    pub(crate) fn check<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            if e.breaks_connection() && self.state != RequestState::Done {
                tracing::warn!(error = %e, "dropping connection");
                self.medium.drop_connection();
                self.state = RequestState::Done;
            }
        }
        result
    }
}
