//! Protocol error types and the wire error vocabulary.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use std::fmt;
use std::str::Utf8Error;
use thiserror::Error;

/// Framing-level errors. These are fatal to the connection they occur on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line not terminated: {0:?}")]
    UnterminatedLine(String),

    #[error("command line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("argument {index} contains a field separator or newline")]
    InvalidArgument { index: usize },

    #[error("invalid body length header: {0:?}")]
    InvalidLength(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: u64, max: u64 },

    #[error("expected body trailer \"done\\n\", got {0:?}")]
    BadTrailer(String),

    #[error("invalid readv range: {0:?}")]
    InvalidRange(String),

    #[error("invalid mode argument: {0:?}")]
    InvalidMode(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed {kind} response: {detail}")]
    MalformedResponse { kind: &'static str, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(kind: &'static str, detail: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse {
            kind,
            detail: detail.into(),
        }
    }
}

/// Error status tokens that may lead a response tuple.
///
/// These tokens are part of the wire contract and must stay byte-identical
/// across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic failure carrying a message.
    Error,
    NoSuchFile,
    FileExists,
    DirectoryNotEmpty,
    ShortReadvError,
    UnicodeDecodeError,
    UnicodeEncodeError,
    ReadOnlyError,
}

impl ErrorCode {
    /// Returns the token as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Error => "error",
            ErrorCode::NoSuchFile => "NoSuchFile",
            ErrorCode::FileExists => "FileExists",
            ErrorCode::DirectoryNotEmpty => "DirectoryNotEmpty",
            ErrorCode::ShortReadvError => "ShortReadvError",
            ErrorCode::UnicodeDecodeError => "UnicodeDecodeError",
            ErrorCode::UnicodeEncodeError => "UnicodeEncodeError",
            ErrorCode::ReadOnlyError => "ReadOnlyError",
        }
    }

    /// Parses a status token. Returns `None` for anything outside the vocabulary.
    pub fn from_wire(token: &[u8]) -> Option<Self> {
        let code = match token {
            b"error" => ErrorCode::Error,
            b"NoSuchFile" => ErrorCode::NoSuchFile,
            b"FileExists" => ErrorCode::FileExists,
            b"DirectoryNotEmpty" => ErrorCode::DirectoryNotEmpty,
            b"ShortReadvError" => ErrorCode::ShortReadvError,
            b"UnicodeDecodeError" => ErrorCode::UnicodeDecodeError,
            b"UnicodeEncodeError" => ErrorCode::UnicodeEncodeError,
            b"ReadOnlyError" => ErrorCode::ReadOnlyError,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain errors raised by a backing transport.
///
/// Every variant except `PathNotPermitted` and `Io` has a typed response
/// tuple and survives the trip from server to client intact.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no such file: {path}")]
    NoSuchFile { path: String },

    #[error("file exists: {path}")]
    FileExists { path: String },

    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    #[error("short readv of {path}: wanted {length} bytes at offset {offset}, got {actual}")]
    ShortReadv {
        path: String,
        offset: u64,
        length: u64,
        actual: u64,
    },

    #[error("'{encoding}' codec can't decode bytes in position {start}-{end}: {reason}")]
    UnicodeDecode {
        encoding: String,
        value: Vec<u8>,
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("'{encoding}' codec can't encode characters in position {start}-{end}: {reason}")]
    UnicodeEncode {
        encoding: String,
        value: String,
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("transport is read-only")]
    ReadOnly,

    #[error("path not permitted: {0}")]
    PathNotPermitted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Builds an `UnicodeDecode` error for bytes that are not valid UTF-8.
    pub fn from_utf8_error(value: &[u8], err: Utf8Error) -> Self {
        let start = err.valid_up_to();
        let end = match err.error_len() {
            Some(len) => start + len,
            None => value.len(),
        };
        TransportError::UnicodeDecode {
            encoding: "utf-8".to_string(),
            value: value.to_vec(),
            start,
            end,
            reason: "invalid utf-8".to_string(),
        }
    }

    /// Returns the status token this error is reported with.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TransportError::NoSuchFile { .. } => ErrorCode::NoSuchFile,
            TransportError::FileExists { .. } => ErrorCode::FileExists,
            TransportError::DirectoryNotEmpty { .. } => ErrorCode::DirectoryNotEmpty,
            TransportError::ShortReadv { .. } => ErrorCode::ShortReadvError,
            TransportError::UnicodeDecode { .. } => ErrorCode::UnicodeDecodeError,
            TransportError::UnicodeEncode { .. } => ErrorCode::UnicodeEncodeError,
            TransportError::ReadOnly => ErrorCode::ReadOnlyError,
            TransportError::PathNotPermitted(_) | TransportError::Io(_) => ErrorCode::Error,
        }
    }

    /// Encodes this error as a response tuple.
    pub fn to_response_args(&self) -> Vec<Bytes> {
        let code = Bytes::from_static(self.error_code().as_str().as_bytes());
        match self {
            TransportError::NoSuchFile { path }
            | TransportError::FileExists { path }
            | TransportError::DirectoryNotEmpty { path } => vec![code, text(path)],
            TransportError::ShortReadv {
                path,
                offset,
                length,
                actual,
            } => vec![
                code,
                text(path),
                text(&offset.to_string()),
                text(&length.to_string()),
                text(&actual.to_string()),
            ],
            TransportError::UnicodeDecode {
                encoding,
                value,
                start,
                end,
                reason,
            } => vec![
                code,
                text(encoding),
                escape_raw(value),
                text(&start.to_string()),
                text(&end.to_string()),
                text(reason),
            ],
            TransportError::UnicodeEncode {
                encoding,
                value,
                start,
                end,
                reason,
            } => vec![
                code,
                text(encoding),
                escape_text(value),
                text(&start.to_string()),
                text(&end.to_string()),
                text(reason),
            ],
            TransportError::ReadOnly => vec![code],
            TransportError::PathNotPermitted(_) | TransportError::Io(_) => {
                vec![code, text(&sanitize(&self.to_string()))]
            }
        }
    }

    /// Decodes a domain error from a response tuple.
    ///
    /// Returns `Ok(None)` when the first element is not a domain error token
    /// (including `ok` and the generic `error`).
    pub fn from_response_args(args: &[Bytes]) -> Result<Option<Self>, ProtocolError> {
        let Some(first) = args.first() else {
            return Ok(None);
        };
        let Some(code) = ErrorCode::from_wire(first) else {
            return Ok(None);
        };
        let kind = code.as_str();
        let err = match code {
            ErrorCode::Error => return Ok(None),
            ErrorCode::NoSuchFile => TransportError::NoSuchFile {
                path: string_field(args, 1, kind)?,
            },
            ErrorCode::FileExists => TransportError::FileExists {
                path: string_field(args, 1, kind)?,
            },
            ErrorCode::DirectoryNotEmpty => TransportError::DirectoryNotEmpty {
                path: string_field(args, 1, kind)?,
            },
            ErrorCode::ShortReadvError => TransportError::ShortReadv {
                path: string_field(args, 1, kind)?,
                offset: int_field(args, 2, kind)?,
                length: int_field(args, 3, kind)?,
                actual: int_field(args, 4, kind)?,
            },
            ErrorCode::UnicodeDecodeError => TransportError::UnicodeDecode {
                encoding: string_field(args, 1, kind)?,
                value: unescape(field(args, 2, kind)?, kind)?,
                start: int_field(args, 3, kind)?,
                end: int_field(args, 4, kind)?,
                reason: string_field(args, 5, kind)?,
            },
            ErrorCode::UnicodeEncodeError => TransportError::UnicodeEncode {
                encoding: string_field(args, 1, kind)?,
                value: String::from_utf8_lossy(&unescape(field(args, 2, kind)?, kind)?)
                    .into_owned(),
                start: int_field(args, 3, kind)?,
                end: int_field(args, 4, kind)?,
                reason: string_field(args, 5, kind)?,
            },
            ErrorCode::ReadOnlyError => TransportError::ReadOnly,
        };
        Ok(Some(err))
    }
}

fn text(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Replaces bytes that cannot appear inside a tuple field.
pub(crate) fn sanitize(message: &str) -> String {
    message.replace(['\x01', '\n'], " ")
}

fn escape_raw(value: &[u8]) -> Bytes {
    Bytes::from(format!("s:{}", BASE64.encode(value)))
}

fn escape_text(value: &str) -> Bytes {
    if value.contains(['\x01', '\n']) {
        escape_raw(value.as_bytes())
    } else {
        Bytes::from(format!("u:{value}"))
    }
}

fn unescape(value: &Bytes, kind: &'static str) -> Result<Vec<u8>, ProtocolError> {
    if let Some(rest) = value.strip_prefix(b"u:") {
        Ok(rest.to_vec())
    } else if let Some(rest) = value.strip_prefix(b"s:") {
        BASE64
            .decode(rest)
            .map_err(|e| ProtocolError::malformed(kind, format!("bad base64 value: {e}")))
    } else {
        Ok(value.to_vec())
    }
}

fn field<'a>(args: &'a [Bytes], index: usize, kind: &'static str) -> Result<&'a Bytes, ProtocolError> {
    args.get(index)
        .ok_or_else(|| ProtocolError::malformed(kind, format!("missing field {index}")))
}

fn string_field(args: &[Bytes], index: usize, kind: &'static str) -> Result<String, ProtocolError> {
    Ok(String::from_utf8_lossy(field(args, index, kind)?).into_owned())
}

fn int_field<T: std::str::FromStr>(
    args: &[Bytes],
    index: usize,
    kind: &'static str,
) -> Result<T, ProtocolError> {
    let raw = string_field(args, index, kind)?;
    raw.parse()
        .map_err(|_| ProtocolError::malformed(kind, format!("field {index} is not an integer: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_error_code_tokens() {
        for code in [
            ErrorCode::Error,
            ErrorCode::NoSuchFile,
            ErrorCode::FileExists,
            ErrorCode::DirectoryNotEmpty,
            ErrorCode::ShortReadvError,
            ErrorCode::UnicodeDecodeError,
            ErrorCode::UnicodeEncodeError,
            ErrorCode::ReadOnlyError,
        ] {
            assert_eq!(ErrorCode::from_wire(code.as_str().as_bytes()), Some(code));
        }
        assert_eq!(ErrorCode::from_wire(b"ok"), None);
        assert_eq!(ErrorCode::from_wire(b"nosuchfile"), None);
        assert_eq!(format!("{}", ErrorCode::ReadOnlyError), "ReadOnlyError");
    }

    #[test]
    fn test_no_such_file_tuple() {
        let err = TransportError::NoSuchFile {
            path: "foo.txt".to_string(),
        };
        assert_eq!(err.to_response_args(), args(&["NoSuchFile", "foo.txt"]));

        let parsed = TransportError::from_response_args(&args(&["NoSuchFile", "foo.txt"]))
            .unwrap()
            .unwrap();
        assert!(matches!(parsed, TransportError::NoSuchFile { path } if path == "foo.txt"));
    }

    #[test]
    fn test_short_readv_tuple() {
        let parsed = TransportError::from_response_args(&args(&[
            "ShortReadvError",
            "a",
            "10",
            "5",
            "2",
        ]))
        .unwrap()
        .unwrap();
        match parsed {
            TransportError::ShortReadv {
                path,
                offset,
                length,
                actual,
            } => {
                assert_eq!(path, "a");
                assert_eq!((offset, length, actual), (10, 5, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unicode_decode_carries_raw_bytes() {
        let raw = b"ab\xffcd";
        let err = match std::str::from_utf8(raw) {
            Err(e) => TransportError::from_utf8_error(raw, e),
            Ok(_) => unreachable!(),
        };
        let tuple = err.to_response_args();
        assert_eq!(tuple[0].as_ref(), b"UnicodeDecodeError");
        assert!(tuple[2].starts_with(b"s:"));
        assert_eq!(tuple[3].as_ref(), b"2");
        assert_eq!(tuple[4].as_ref(), b"3");

        match TransportError::from_response_args(&tuple).unwrap().unwrap() {
            TransportError::UnicodeDecode {
                value, start, end, ..
            } => {
                assert_eq!(value, raw.to_vec());
                assert_eq!((start, end), (2, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unicode_encode_text_value() {
        let err = TransportError::UnicodeEncode {
            encoding: "ascii".to_string(),
            value: "caf\u{e9}".to_string(),
            start: 3,
            end: 4,
            reason: "ordinal not in range(128)".to_string(),
        };
        let tuple = err.to_response_args();
        assert!(tuple[2].starts_with(b"u:"));
        match TransportError::from_response_args(&tuple).unwrap().unwrap() {
            TransportError::UnicodeEncode { value, .. } => assert_eq!(value, "caf\u{e9}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_read_only_and_generic() {
        assert_eq!(
            TransportError::ReadOnly.to_response_args(),
            args(&["ReadOnlyError"])
        );
        assert!(matches!(
            TransportError::from_response_args(&args(&["ReadOnlyError"])),
            Ok(Some(TransportError::ReadOnly))
        ));

        // The generic error and success tokens are not domain errors.
        assert!(TransportError::from_response_args(&args(&["error", "boom"]))
            .unwrap()
            .is_none());
        assert!(TransportError::from_response_args(&args(&["ok"]))
            .unwrap()
            .is_none());

        let io = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk\non fire",
        ));
        let tuple = io.to_response_args();
        assert_eq!(tuple[0].as_ref(), b"error");
        assert!(!tuple[1].contains(&b'\n'));
    }

    #[test]
    fn test_malformed_domain_tuple() {
        let result = TransportError::from_response_args(&args(&["ShortReadvError", "a", "x"]));
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedResponse { kind: "ShortReadvError", .. })
        ));

        let result = TransportError::from_response_args(&args(&["FileExists"]));
        assert!(matches!(result, Err(ProtocolError::MalformedResponse { .. })));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::BodyTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::InvalidArgument { index: 2 };
        assert!(err.to_string().contains('2'));

        let err = ProtocolError::BadTrailer("nope\n".to_string());
        assert!(err.to_string().contains("nope"));
    }
}
