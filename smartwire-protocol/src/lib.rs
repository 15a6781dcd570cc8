//! # smartwire-protocol
//!
//! Wire protocol implementation for the version-1 smart protocol.
//!
//! This crate provides:
//! - Tuple codec for `\x01`-separated, newline-terminated request and response lines
//! - Length-prefixed bulk body framing and a streaming body decoder
//! - Response and readv message types
//! - The wire error vocabulary and typed domain errors

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{decode_tuple, encode_tuple, split_line};
pub use error::{ErrorCode, ProtocolError, TransportError};
pub use frame::{encode_body, LengthPrefixedBodyDecoder};
pub use message::{
    deserialise_flag, deserialise_mode, deserialise_offsets, serialise_flag, serialise_mode,
    serialise_offsets, ReadvRange, SmartResponse, Stat,
};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP port for a smart server.
pub const DEFAULT_PORT: u16 = 4155;

/// Separator between fields of a request or response line.
pub const FIELD_SEPARATOR: u8 = 0x01;

/// Trailer that terminates a bulk body.
pub const BODY_TRAILER: &[u8] = b"done\n";

/// Maximum declared bulk body length (1 GiB).
pub const MAX_BODY_SIZE: u64 = 1024 * 1024 * 1024;

/// Maximum command line length, newline included (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Largest single read a medium should issue (64 KiB).
pub const MAX_READ_SIZE: usize = 64 * 1024;
