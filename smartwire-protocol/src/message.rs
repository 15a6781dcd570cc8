//! Response and argument types carried in tuples and bodies.

use crate::codec::encode_tuple;
use crate::error::ProtocolError;
use crate::frame::encode_body;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Success status token.
pub const OK: &[u8] = b"ok";

/// A response: one tuple plus an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartResponse {
    pub args: Vec<Bytes>,
    pub body: Option<Bytes>,
}

impl SmartResponse {
    pub fn new<A: AsRef<[u8]>>(args: &[A]) -> Self {
        Self {
            args: args.iter().map(|a| Bytes::copy_from_slice(a.as_ref())).collect(),
            body: None,
        }
    }

    /// The bare `("ok",)` response.
    pub fn ok() -> Self {
        Self {
            args: vec![Bytes::from_static(OK)],
            body: None,
        }
    }

    pub fn from_args(args: Vec<Bytes>) -> Self {
        Self { args, body: None }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First element of the tuple, or empty if there is none.
    pub fn status(&self) -> &[u8] {
        self.args.first().map(|a| &a[..]).unwrap_or_default()
    }

    pub fn is_ok(&self) -> bool {
        self.status() == OK
    }

    /// Encodes the tuple line followed by the body, if any.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = encode_tuple(&self.args)?;
        if let Some(body) = &self.body {
            buf.unsplit(encode_body(body));
        }
        Ok(buf)
    }
}

/// One `start,length` range of a readv request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadvRange {
    pub start: u64,
    pub length: u64,
}

impl ReadvRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}

impl fmt::Display for ReadvRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.length)
    }
}

/// Serialises ranges one per line, without a trailing newline.
pub fn serialise_offsets(ranges: &[ReadvRange]) -> Vec<u8> {
    ranges
        .iter()
        .map(ReadvRange::to_string)
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

/// Parses a readv request body. Blank lines are ignored.
pub fn deserialise_offsets(body: &[u8]) -> Result<Vec<ReadvRange>, ProtocolError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| ProtocolError::InvalidRange("body is not ASCII".to_string()))?;

    let mut ranges = Vec::new();
    for line in text.split('\n').filter(|l| !l.is_empty()) {
        let (start, length) = line
            .split_once(',')
            .ok_or_else(|| ProtocolError::InvalidRange(line.to_string()))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidRange(line.to_string()))
        };
        ranges.push(ReadvRange::new(parse(start)?, parse(length)?));
    }
    Ok(ranges)
}

/// File metadata returned by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub mode: u32,
}

impl Stat {
    /// Mode in octal with a leading zero, e.g. `0100644`.
    pub fn mode_to_wire(&self) -> String {
        if self.mode == 0 {
            "0".to_string()
        } else {
            format!("0{:o}", self.mode)
        }
    }

    pub fn to_response_args(&self) -> Vec<Bytes> {
        vec![
            Bytes::from_static(b"stat"),
            Bytes::from(self.size.to_string()),
            Bytes::from(self.mode_to_wire()),
        ]
    }

    /// Parses the fields following the `stat` token.
    pub fn from_wire(size: &[u8], mode: &[u8]) -> Result<Self, ProtocolError> {
        let size_text = String::from_utf8_lossy(size);
        let size = size_text
            .parse()
            .map_err(|_| ProtocolError::malformed("stat", format!("bad size {size_text:?}")))?;

        let mode_text = String::from_utf8_lossy(mode);
        let digits = mode_text.strip_prefix("0o").unwrap_or(&mode_text);
        let mode = u32::from_str_radix(digits, 8)
            .map_err(|_| ProtocolError::malformed("stat", format!("bad mode {mode_text:?}")))?;

        Ok(Self { size, mode })
    }
}

/// Serialises an optional permission mode: empty for "default", else decimal.
pub fn serialise_mode(mode: Option<u32>) -> String {
    match mode {
        Some(mode) => mode.to_string(),
        None => String::new(),
    }
}

/// Parses a mode argument produced by [`serialise_mode`].
pub fn deserialise_mode(raw: &[u8]) -> Result<Option<u32>, ProtocolError> {
    if raw.is_empty() {
        return Ok(None);
    }
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Some)
        .ok_or_else(|| ProtocolError::InvalidMode(String::from_utf8_lossy(raw).into_owned()))
}

/// Boolean argument flag, `T` or `F`.
pub fn serialise_flag(flag: bool) -> &'static str {
    if flag {
        "T"
    } else {
        "F"
    }
}

pub fn deserialise_flag(raw: &[u8]) -> bool {
    raw == b"T"
}
