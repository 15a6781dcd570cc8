//! Byte-stream abstraction over the medium transports.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout};

/// How long a closed SSH session may take to exit before it is killed.
const SSH_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Boxed read half of a pre-opened pipe.
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a pre-opened pipe.
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

pin_project! {
    /// A live connection: a TCP socket, an SSH subprocess, or a pipe pair.
    #[project = MediumStreamProj]
    pub enum MediumStream {
        Tcp { #[pin] stream: TcpStream },
        Ssh {
            child: Child,
            #[pin] stdin: ChildStdin,
            #[pin] stdout: ChildStdout,
        },
        Pipe {
            #[pin] reader: PipeReader,
            #[pin] writer: PipeWriter,
        },
    }
}

impl MediumStream {
    /// Returns a short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            MediumStream::Tcp { .. } => "tcp",
            MediumStream::Ssh { .. } => "ssh",
            MediumStream::Pipe { .. } => "pipe",
        }
    }

    /// Closes the connection, waiting briefly for an SSH session to exit.
    pub async fn close(mut self) {
        let _ = self.shutdown().await;
        if let MediumStream::Ssh { mut child, .. } = self {
            match tokio::time::timeout(SSH_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("ssh session exited: {}", status),
                Ok(Err(e)) => tracing::debug!("waiting for ssh session failed: {}", e),
                Err(_) => {
                    tracing::debug!("ssh session did not exit, killing it");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

impl AsyncRead for MediumStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MediumStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
            MediumStreamProj::Ssh { stdout, .. } => stdout.poll_read(cx, buf),
            MediumStreamProj::Pipe { reader, .. } => reader.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MediumStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MediumStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
            MediumStreamProj::Ssh { stdin, .. } => stdin.poll_write(cx, buf),
            MediumStreamProj::Pipe { writer, .. } => writer.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MediumStreamProj::Tcp { stream } => stream.poll_flush(cx),
            MediumStreamProj::Ssh { stdin, .. } => stdin.poll_flush(cx),
            MediumStreamProj::Pipe { writer, .. } => writer.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MediumStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
            MediumStreamProj::Ssh { stdin, .. } => stdin.poll_shutdown(cx),
            MediumStreamProj::Pipe { writer, .. } => writer.poll_shutdown(cx),
        }
    }
}
