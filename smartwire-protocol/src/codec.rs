//! Tuple codec for request and response lines.
//!
//! A tuple is a sequence of byte strings joined by `\x01` and terminated by a
//! single `\n`. Fields may be empty but may not contain either delimiter.

use crate::error::ProtocolError;
use crate::FIELD_SEPARATOR;
use bytes::{BufMut, Bytes, BytesMut};

/// Encodes a tuple into a single newline-terminated line.
pub fn encode_tuple<A: AsRef<[u8]>>(args: &[A]) -> Result<BytesMut, ProtocolError> {
    let len = args.iter().map(|a| a.as_ref().len() + 1).sum::<usize>().max(1);
    let mut buf = BytesMut::with_capacity(len);

    for (index, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if arg.iter().any(|&b| b == FIELD_SEPARATOR || b == b'\n') {
            return Err(ProtocolError::InvalidArgument { index });
        }
        if index > 0 {
            buf.put_u8(FIELD_SEPARATOR);
        }
        buf.put_slice(arg);
    }
    buf.put_u8(b'\n');

    Ok(buf)
}

/// Decodes a complete line into a tuple.
///
/// Returns `Ok(None)` for empty input, which callers treat as end of stream.
/// A non-empty line without the trailing `\n` is a protocol error.
pub fn decode_tuple(line: &[u8]) -> Result<Option<Vec<Bytes>>, ProtocolError> {
    if line.is_empty() {
        return Ok(None);
    }
    let Some(body) = line.strip_suffix(b"\n") else {
        return Err(ProtocolError::UnterminatedLine(preview(line)));
    };

    let fields = body
        .split(|&b| b == FIELD_SEPARATOR)
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(Some(fields))
}

/// Splits one complete line (including its `\n`) off the front of `buf`.
///
/// Returns `None` if no newline has arrived yet; the buffer is left untouched.
pub fn split_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    Some(buf.split_to(pos + 1))
}

fn preview(line: &[u8]) -> String {
    const MAX_PREVIEW: usize = 64;
    let end = line.len().min(MAX_PREVIEW);
    String::from_utf8_lossy(&line[..end]).into_owned()
}
