//! Server error types.

use bytes::Bytes;
use smartwire_protocol::{ErrorCode, SmartResponse, TransportError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] smartwire_protocol::ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("{method} expects {expected} arguments, got {got}")]
    BadArguments {
        method: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0} does not take a body")]
    UnexpectedBody(&'static str),

    #[error("connection closed mid-request")]
    ConnectionClosed,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ServerError {
    /// Returns the status token this error is reported with.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Transport(e) => e.error_code(),
            _ => ErrorCode::Error,
        }
    }

    /// Converts to the response sent in place of a normal reply.
    pub fn to_response(&self) -> SmartResponse {
        match self {
            ServerError::Transport(e) => SmartResponse::from_args(e.to_response_args()),
            other => {
                let message = other.to_string().replace(['\x01', '\n'], " ");
                SmartResponse::from_args(vec![
                    Bytes::from_static(ErrorCode::Error.as_str().as_bytes()),
                    Bytes::from(message),
                ])
            }
        }
    }
}
