//! Length-prefixed bulk body framing.
//!
//! Body layout:
//!
//! ```text
//! +------------------+-----------------------+---------+
//! | decimal length   | payload               | trailer |
//! | ASCII, then "\n" | exactly length bytes  | "done\n"|
//! +------------------+-----------------------+---------+
//! ```
//!
//! Anything after the trailer belongs to the next message and is kept aside
//! as unused data.

use crate::error::ProtocolError;
use crate::{BODY_TRAILER, MAX_BODY_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// Longest length header accepted before giving up on finding its newline.
const MAX_LENGTH_DIGITS: usize = 20;

/// Encodes a payload as a framed body.
pub fn encode_body(payload: &[u8]) -> BytesMut {
    let header = format!("{}\n", payload.len());
    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + BODY_TRAILER.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.put_slice(BODY_TRAILER);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    ExpectingLength,
    ReadingBody,
    ReadingTrailer,
    ReadingUnused,
}

/// Streaming decoder for a framed body.
///
/// Accepts arbitrarily sized chunks and never blocks. Decoded payload bytes
/// are drained with [`read_pending_data`](Self::read_pending_data) as they
/// arrive.
#[derive(Debug)]
pub struct LengthPrefixedBodyDecoder {
    state: DecoderState,
    max_body_size: u64,
    length_buf: BytesMut,
    bytes_left: u64,
    pending: BytesMut,
    trailer_buf: BytesMut,
    unused: BytesMut,
}

impl LengthPrefixedBodyDecoder {
    pub fn new() -> Self {
        Self::with_max_body_size(MAX_BODY_SIZE)
    }

    /// Creates a decoder that rejects declared lengths above `max_body_size`.
    pub fn with_max_body_size(max_body_size: u64) -> Self {
        Self {
            state: DecoderState::ExpectingLength,
            max_body_size,
            length_buf: BytesMut::new(),
            bytes_left: 0,
            pending: BytesMut::new(),
            trailer_buf: BytesMut::with_capacity(BODY_TRAILER.len()),
            unused: BytesMut::new(),
        }
    }

    /// Feeds bytes into the decoder.
    pub fn accept_bytes(&mut self, mut input: &[u8]) -> Result<(), ProtocolError> {
        while !input.is_empty() {
            match self.state {
                DecoderState::ExpectingLength => {
                    input = self.accept_length(input)?;
                }
                DecoderState::ReadingBody => {
                    let take = clamp_len(self.bytes_left, input.len());
                    self.pending.extend_from_slice(&input[..take]);
                    self.bytes_left -= take as u64;
                    input = &input[take..];
                    if self.bytes_left == 0 {
                        self.state = DecoderState::ReadingTrailer;
                    }
                }
                DecoderState::ReadingTrailer => {
                    let need = BODY_TRAILER.len() - self.trailer_buf.len();
                    let take = need.min(input.len());
                    self.trailer_buf.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if self.trailer_buf.len() == BODY_TRAILER.len() {
                        if &self.trailer_buf[..] != BODY_TRAILER {
                            return Err(ProtocolError::BadTrailer(
                                String::from_utf8_lossy(&self.trailer_buf).into_owned(),
                            ));
                        }
                        self.state = DecoderState::ReadingUnused;
                    }
                }
                DecoderState::ReadingUnused => {
                    self.unused.extend_from_slice(input);
                    input = &[];
                }
            }
        }
        Ok(())
    }

    fn accept_length<'a>(&mut self, input: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        let Some(pos) = input.iter().position(|&b| b == b'\n') else {
            self.length_buf.extend_from_slice(input);
            if self.length_buf.len() > MAX_LENGTH_DIGITS {
                return Err(self.invalid_length());
            }
            return Ok(&[]);
        };

        self.length_buf.extend_from_slice(&input[..pos]);
        if self.length_buf.is_empty() || !self.length_buf.iter().all(u8::is_ascii_digit) {
            return Err(self.invalid_length());
        }
        let length: u64 = std::str::from_utf8(&self.length_buf)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.invalid_length())?;
        if length > self.max_body_size {
            return Err(ProtocolError::BodyTooLarge {
                size: length,
                max: self.max_body_size,
            });
        }

        self.bytes_left = length;
        self.state = if length == 0 {
            DecoderState::ReadingTrailer
        } else {
            DecoderState::ReadingBody
        };
        Ok(&input[pos + 1..])
    }

    fn invalid_length(&self) -> ProtocolError {
        ProtocolError::InvalidLength(String::from_utf8_lossy(&self.length_buf).into_owned())
    }

    /// Returns true once the trailer has been matched.
    pub fn finished_reading(&self) -> bool {
        self.state == DecoderState::ReadingUnused
    }

    /// Number of bytes worth requesting from the transport next.
    ///
    /// While reading the payload this covers the rest of the payload plus the
    /// trailer, so a well-sized read finishes the body in one call.
    pub fn next_read_size(&self) -> usize {
        match self.state {
            DecoderState::ExpectingLength => 6,
            DecoderState::ReadingBody => usize::try_from(self.bytes_left)
                .unwrap_or(usize::MAX)
                .saturating_add(BODY_TRAILER.len()),
            DecoderState::ReadingTrailer => BODY_TRAILER.len() - self.trailer_buf.len(),
            DecoderState::ReadingUnused => 1,
        }
    }

    /// Takes all payload bytes decoded since the last call.
    pub fn read_pending_data(&mut self) -> Bytes {
        self.pending.split().freeze()
    }

    /// Bytes received after the trailer.
    pub fn unused_data(&self) -> &[u8] {
        &self.unused
    }

    /// Takes the bytes received after the trailer.
    pub fn take_unused_data(&mut self) -> Bytes {
        self.unused.split().freeze()
    }
}

impl Default for LengthPrefixedBodyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_len(remaining: u64, available: usize) -> usize {
    usize::try_from(remaining).map_or(available, |r| r.min(available))
}
