//! Client error types.

use smartwire_protocol::{ProtocolError, TransportError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("medium not connected")]
    MediumNotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    Timeout(String),

    #[error("request has already finished writing")]
    WritingCompleted,

    #[error("request has already finished reading")]
    ReadingCompleted,

    #[error("request has not finished writing")]
    WritingNotComplete,

    #[error("a request is already outstanding on this medium")]
    TooManyConcurrentRequests,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::ConnectFailed { .. } => true,
            _ => false,
        }
    }

    /// True when the stream position is unknown after the error, so the
    /// connection cannot carry another request.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::ConnectionClosed | ClientError::Protocol(_)
        )
    }

    /// True for the caller-side ordering mistakes that never reach the wire.
    pub fn is_sequencing(&self) -> bool {
        matches!(
            self,
            ClientError::WritingCompleted
                | ClientError::ReadingCompleted
                | ClientError::WritingNotComplete
                | ClientError::TooManyConcurrentRequests
        )
    }
}
