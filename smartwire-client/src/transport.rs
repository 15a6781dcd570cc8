//! File operations against a remote smart server.

use crate::error::ClientError;
use crate::medium::ClientMedium;
use crate::protocol::ClientProtocol;
use bytes::Bytes;
use smartwire_protocol::{serialise_flag, serialise_mode, ReadvRange, Stat, TransportError};
use std::collections::HashMap;

/// Default cap on the number of ranges merged into one wire range.
pub const DEFAULT_MAX_READV_COMBINE: usize = 50;

/// A wire range covering one or more requested ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedRange {
    pub start: u64,
    pub length: u64,
    /// Requested ranges as `(offset into this range, length)`.
    pub ranges: Vec<(u64, u64)>,
}

/// Merges sorted offsets into as few wire ranges as possible.
///
/// A range joins the current one when it starts no more than `fudge`
/// bytes past the current end and the current one holds fewer than
/// `limit` ranges (`0` means no limit).
pub fn coalesce_offsets(sorted: &[ReadvRange], limit: usize, fudge: u64) -> Vec<CoalescedRange> {
    let mut out: Vec<CoalescedRange> = Vec::new();
    let mut last_end: Option<u64> = None;

    for range in sorted {
        let mergeable = match (out.last(), last_end) {
            (Some(cur), Some(end)) => {
                range.start <= end.saturating_add(fudge)
                    && range.start >= cur.start
                    && (limit == 0 || cur.ranges.len() < limit)
            }
            _ => false,
        };
        match out.last_mut() {
            Some(cur) if mergeable => {
                let offset = range.start - cur.start;
                cur.ranges.push((offset, range.length));
                cur.length = cur.length.max(range.end() - cur.start);
            }
            _ => out.push(CoalescedRange {
                start: range.start,
                length: range.length,
                ranges: vec![(0, range.length)],
            }),
        }
        let end = range.end();
        last_end = Some(last_end.map_or(end, |e| e.max(end)));
    }
    out
}

/// Maps file operations onto protocol calls over one medium.
pub struct RemoteTransport {
    medium: ClientMedium,
    base: String,
    max_readv_combine: usize,
    bytes_to_read_before_seek: u64,
}

impl RemoteTransport {
    pub fn new(medium: ClientMedium) -> Self {
        Self {
            medium,
            base: String::new(),
            max_readv_combine: DEFAULT_MAX_READV_COMBINE,
            bytes_to_read_before_seek: 0,
        }
    }

    /// Resolves every relative path against `base`.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_readv_coalescing(mut self, max_combine: usize, fudge: u64) -> Self {
        self.max_readv_combine = max_combine;
        self.bytes_to_read_before_seek = fudge;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn medium(&self) -> &ClientMedium {
        &self.medium
    }

    /// Joins `relpath` onto the base path, resolving `.` and `..`.
    ///
    /// A leading `/` makes `relpath` absolute.
    pub fn remote_path(&self, relpath: &str) -> Result<String, ClientError> {
        let combined = if relpath.starts_with('/') {
            relpath.to_string()
        } else {
            format!("{}/{}", self.base, relpath)
        };
        let mut parts: Vec<&str> = Vec::new();
        for segment in combined.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(ClientError::InvalidPath(relpath.to_string()));
                    }
                }
                s => parts.push(s),
            }
        }
        Ok(parts.join("/"))
    }

    async fn call(&mut self, args: &[&str]) -> Result<Vec<Bytes>, ClientError> {
        let mut protocol = ClientProtocol::new(self.medium.get_request()?);
        protocol.call(args).await?;
        protocol.read_response_tuple(false).await
    }

    async fn call_with_body(&mut self, args: &[&str], body: &[u8]) -> Result<Vec<Bytes>, ClientError> {
        let mut protocol = ClientProtocol::new(self.medium.get_request()?);
        protocol.call_with_body_bytes(args, body).await?;
        protocol.read_response_tuple(false).await
    }

    async fn call_expecting_ok(
        &mut self,
        args: &[&str],
        orig_path: &str,
    ) -> Result<(), ClientError> {
        let response = self.call(args).await?;
        expect_ok(&response, orig_path)
    }

    /// Checks that the server speaks protocol version 1.
    pub async fn query_version(&mut self) -> Result<u32, ClientError> {
        let mut protocol = ClientProtocol::new(self.medium.get_request()?);
        protocol.query_version().await
    }

    pub async fn has(&mut self, relpath: &str) -> Result<bool, ClientError> {
        let path = self.remote_path(relpath)?;
        let response = self.call(&["has", &path]).await?;
        match response.first().map(|s| &s[..]) {
            Some(b"yes") => Ok(true),
            Some(b"no") => Ok(false),
            _ => Err(translate_error(&response, Some(relpath))),
        }
    }

    pub async fn get_bytes(&mut self, relpath: &str) -> Result<Bytes, ClientError> {
        let path = self.remote_path(relpath)?;
        let mut protocol = ClientProtocol::new(self.medium.get_request()?);
        protocol.call(&["get", &path]).await?;
        let response = protocol.read_response_tuple(true).await?;
        if !is_ok(&response) {
            protocol.cancel_read_body()?;
            return Err(translate_error(&response, Some(relpath)));
        }
        protocol.read_body_bytes(None).await
    }

    /// Writes a whole file; the server replaces it atomically.
    pub async fn put_bytes(
        &mut self,
        relpath: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<(), ClientError> {
        let path = self.remote_path(relpath)?;
        let mode = serialise_mode(mode);
        let response = self.call_with_body(&["put", &path, &mode], bytes).await?;
        expect_ok(&response, relpath)
    }

    pub async fn put_bytes_non_atomic(
        &mut self,
        relpath: &str,
        bytes: &[u8],
        mode: Option<u32>,
        create_parent_dir: bool,
        dir_mode: Option<u32>,
    ) -> Result<(), ClientError> {
        let path = self.remote_path(relpath)?;
        let mode = serialise_mode(mode);
        let dir_mode = serialise_mode(dir_mode);
        let args = [
            "put_non_atomic",
            path.as_str(),
            mode.as_str(),
            serialise_flag(create_parent_dir),
            dir_mode.as_str(),
        ];
        let response = self.call_with_body(&args, bytes).await?;
        expect_ok(&response, relpath)
    }

    /// Appends to a file, returning its length before the append.
    pub async fn append_bytes(
        &mut self,
        relpath: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<u64, ClientError> {
        let path = self.remote_path(relpath)?;
        let mode = serialise_mode(mode);
        let response = self.call_with_body(&["append", &path, &mode], bytes).await?;
        match response.as_slice() {
            [status, offset] if &status[..] == b"appended" => parse_u64(offset),
            _ => Err(translate_error(&response, Some(relpath))),
        }
    }

    pub async fn delete(&mut self, relpath: &str) -> Result<(), ClientError> {
        let path = self.remote_path(relpath)?;
        self.call_expecting_ok(&["delete", &path], relpath).await
    }

    pub async fn mkdir(&mut self, relpath: &str, mode: Option<u32>) -> Result<(), ClientError> {
        let path = self.remote_path(relpath)?;
        let mode = serialise_mode(mode);
        self.call_expecting_ok(&["mkdir", &path, &mode], relpath).await
    }

    pub async fn rmdir(&mut self, relpath: &str) -> Result<(), ClientError> {
        let path = self.remote_path(relpath)?;
        self.call_expecting_ok(&["rmdir", &path], relpath).await
    }

    /// Renames `from` to `to`; fails if `to` exists.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<(), ClientError> {
        let from_path = self.remote_path(from)?;
        let to_path = self.remote_path(to)?;
        self.call_expecting_ok(&["rename", &from_path, &to_path], from)
            .await
    }

    /// Moves `from` to `to`, replacing `to`.
    pub async fn move_path(&mut self, from: &str, to: &str) -> Result<(), ClientError> {
        let from_path = self.remote_path(from)?;
        let to_path = self.remote_path(to)?;
        self.call_expecting_ok(&["move", &from_path, &to_path], from)
            .await
    }

    pub async fn stat(&mut self, relpath: &str) -> Result<Stat, ClientError> {
        let path = self.remote_path(relpath)?;
        let response = self.call(&["stat", &path]).await?;
        match response.as_slice() {
            [status, size, mode] if &status[..] == b"stat" => Ok(Stat::from_wire(size, mode)?),
            _ => Err(translate_error(&response, Some(relpath))),
        }
    }

    pub async fn list_dir(&mut self, relpath: &str) -> Result<Vec<String>, ClientError> {
        let path = self.remote_path(relpath)?;
        let response = self.call(&["list_dir", &path]).await?;
        names(&response, relpath)
    }

    /// Lists every file below `relpath`, relative to it.
    pub async fn iter_files_recursive(&mut self, relpath: &str) -> Result<Vec<String>, ClientError> {
        let path = self.remote_path(relpath)?;
        let response = self.call(&["iter_files_recursive", &path]).await?;
        names(&response, relpath)
    }

    /// Reads several ranges of one file in a single round trip.
    ///
    /// Results come back in the order of `offsets`, one `(offset, data)`
    /// pair per requested range.
    pub async fn readv(
        &mut self,
        relpath: &str,
        offsets: &[(u64, u64)],
    ) -> Result<Vec<(u64, Bytes)>, ClientError> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        let path = self.remote_path(relpath)?;

        let mut sorted: Vec<ReadvRange> = offsets
            .iter()
            .map(|&(start, length)| ReadvRange::new(start, length))
            .collect();
        sorted.sort();
        sorted.dedup();
        let coalesced = coalesce_offsets(
            &sorted,
            self.max_readv_combine,
            self.bytes_to_read_before_seek,
        );
        let wire_ranges: Vec<ReadvRange> = coalesced
            .iter()
            .map(|c| ReadvRange::new(c.start, c.length))
            .collect();
        tracing::debug!(
            path = %path,
            requested = offsets.len(),
            sent = wire_ranges.len(),
            "readv"
        );

        let mut protocol = ClientProtocol::new(self.medium.get_request()?);
        protocol
            .call_with_body_readv_array(&["readv", &path], &wire_ranges)
            .await?;
        let response = protocol.read_response_tuple(true).await?;
        if response.first().map(|s| &s[..]) != Some(&b"readv"[..]) {
            protocol.cancel_read_body()?;
            return Err(translate_error(&response, Some(relpath)));
        }
        let data = protocol.read_body_bytes(None).await?;

        let pieces = demultiplex(relpath, data, &coalesced)?;
        offsets
            .iter()
            .map(|&(start, length)| {
                pieces
                    .get(&(start, length))
                    .map(|piece| (start, piece.clone()))
                    .ok_or_else(|| {
                        ClientError::UnexpectedResponse(format!(
                            "readv reply is missing range {},{}",
                            start, length
                        ))
                    })
            })
            .collect()
    }

    /// Closes the connection. Calling it again is a no-op.
    pub async fn disconnect(&mut self) {
        self.medium.disconnect().await;
    }
}

/// Slices the concatenated readv body back into the requested ranges.
fn demultiplex(
    relpath: &str,
    mut data: Bytes,
    coalesced: &[CoalescedRange],
) -> Result<HashMap<(u64, u64), Bytes>, ClientError> {
    let mut pieces = HashMap::new();
    for range in coalesced {
        if (data.len() as u64) < range.length {
            return Err(TransportError::ShortReadv {
                path: relpath.to_string(),
                offset: range.start,
                length: range.length,
                actual: data.len() as u64,
            }
            .into());
        }
        let chunk = data.split_to(range.length as usize);
        for &(offset, length) in &range.ranges {
            let start = offset as usize;
            let end = start + length as usize;
            pieces.insert((range.start + offset, length), chunk.slice(start..end));
        }
    }
    Ok(pieces)
}

fn is_ok(response: &[Bytes]) -> bool {
    response.first().map(|s| &s[..]) == Some(&b"ok"[..])
}

fn expect_ok(response: &[Bytes], orig_path: &str) -> Result<(), ClientError> {
    if is_ok(response) {
        Ok(())
    } else {
        Err(translate_error(response, Some(orig_path)))
    }
}

fn parse_u64(raw: &[u8]) -> Result<u64, ClientError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ClientError::UnexpectedResponse(format!(
                "not an integer: {:?}",
                String::from_utf8_lossy(raw)
            ))
        })
}

fn names(response: &[Bytes], orig_path: &str) -> Result<Vec<String>, ClientError> {
    match response.split_first() {
        Some((status, rest)) if &status[..] == b"names" => rest
            .iter()
            .map(|name| {
                std::str::from_utf8(name)
                    .map(str::to_string)
                    .map_err(|e| ClientError::from(TransportError::from_utf8_error(name, e)))
            })
            .collect(),
        _ => Err(translate_error(response, Some(orig_path))),
    }
}

/// Turns a non-success response tuple into a typed error.
///
/// `NoSuchFile` reports the caller's path rather than the joined remote one.
pub fn translate_error(response: &[Bytes], orig_path: Option<&str>) -> ClientError {
    match TransportError::from_response_args(response) {
        Ok(Some(TransportError::NoSuchFile { path })) => TransportError::NoSuchFile {
            path: orig_path.map(str::to_string).unwrap_or(path),
        }
        .into(),
        Ok(Some(err)) => err.into(),
        Err(e) => e.into(),
        Ok(None) => match response.split_first() {
            Some((status, rest)) if &status[..] == b"error" => ClientError::Server(
                rest.iter()
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => ClientError::UnexpectedResponse(format!("{:?}", response)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn args(items: &[&str]) -> Vec<Bytes> {
        items
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    fn ranges(items: &[(u64, u64)]) -> Vec<ReadvRange> {
        items.iter().map(|&(s, l)| ReadvRange::new(s, l)).collect()
    }

    fn transport(mock: tokio_test::io::Mock) -> RemoteTransport {
        let (reader, writer) = tokio::io::split(mock);
        RemoteTransport::new(ClientMedium::pipe(reader, writer))
    }

    #[test]
    fn test_coalesce_separate_ranges() {
        let out = coalesce_offsets(&ranges(&[(0, 1), (3, 2)]), 50, 0);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].start, out[0].length), (0, 1));
        assert_eq!((out[1].start, out[1].length), (3, 2));
    }

    #[test]
    fn test_coalesce_adjacent_ranges() {
        let out = coalesce_offsets(&ranges(&[(0, 2), (2, 3), (5, 1)]), 50, 0);
        assert_eq!(
            out,
            vec![CoalescedRange {
                start: 0,
                length: 6,
                ranges: vec![(0, 2), (2, 3), (5, 1)],
            }]
        );
    }

    #[test]
    fn test_coalesce_with_fudge() {
        let out = coalesce_offsets(&ranges(&[(0, 2), (4, 2)]), 50, 2);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].length, 6);
        assert_eq!(out[0].ranges, vec![(0, 2), (4, 2)]);
    }

    #[test]
    fn test_coalesce_respects_limit() {
        let out = coalesce_offsets(&ranges(&[(0, 1), (1, 1), (2, 1)]), 2, 0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ranges.len(), 2);
        assert_eq!((out[1].start, out[1].length), (2, 1));
    }

    #[test]
    fn test_coalesce_contained_range_keeps_length() {
        let out = coalesce_offsets(&ranges(&[(0, 10), (2, 3), (9, 4)]), 50, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].length, 13);
        assert_eq!(out[0].ranges, vec![(0, 10), (2, 3), (9, 4)]);
    }

    #[test]
    fn test_remote_path() {
        let t = RemoteTransport::new(ClientMedium::tcp("127.0.0.1:1"));
        assert_eq!(t.remote_path("foo.txt").unwrap(), "foo.txt");
        assert_eq!(t.remote_path("./a/../b").unwrap(), "b");
        assert!(t.remote_path("..").is_err());

        let t = t.with_base("/srv/repo");
        assert_eq!(t.base(), "/srv/repo");
        assert_eq!(t.remote_path("foo.txt").unwrap(), "srv/repo/foo.txt");
        assert_eq!(t.remote_path("../other").unwrap(), "srv/other");
        assert_eq!(t.remote_path("/abs").unwrap(), "abs");
        assert_eq!(t.remote_path("").unwrap(), "srv/repo");
    }

    #[test]
    fn test_translate_no_such_file_uses_caller_path() {
        let err = translate_error(&args(&["NoSuchFile", "base/foo.txt"]), Some("foo.txt"));
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::NoSuchFile { ref path }) if path == "foo.txt"
        ));
    }

    #[test]
    fn test_translate_typed_errors() {
        assert!(matches!(
            translate_error(&args(&["ReadOnlyError"]), None),
            ClientError::Transport(TransportError::ReadOnly)
        ));
        assert!(matches!(
            translate_error(&args(&["FileExists", "x"]), Some("y")),
            ClientError::Transport(TransportError::FileExists { ref path }) if path == "x"
        ));
        assert!(matches!(
            translate_error(&args(&["error", "boom"]), None),
            ClientError::Server(ref msg) if msg == "boom"
        ));
        assert!(matches!(
            translate_error(&args(&["wat"]), None),
            ClientError::UnexpectedResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_get_missing_file() {
        let mut t = transport(
            Builder::new()
                .write(b"get\x01foo.txt\n")
                .read(b"NoSuchFile\x01foo.txt\n")
                .build(),
        );
        let err = t.get_bytes("foo.txt").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::NoSuchFile { .. })
        ));
        assert!(!t.medium().has_outstanding_request());
    }

    #[tokio::test]
    async fn test_readv_demultiplexes() {
        let mut t = transport(
            Builder::new()
                .write(b"readv\x01a\n")
                .write(b"7\n0,1\n3,2done\n")
                .read(b"readv\n3\n034done\n")
                .build(),
        );
        let result = t.readv("a", &[(3, 2), (0, 1)]).await.unwrap();
        assert_eq!(
            result,
            vec![
                (3, Bytes::from_static(b"34")),
                (0, Bytes::from_static(b"0"))
            ]
        );
    }

    #[tokio::test]
    async fn test_readv_overlapping_and_duplicate_ranges() {
        let mut t = transport(
            Builder::new()
                .write(b"readv\x01a\n")
                .write(b"3\n0,4done\n")
                .read(b"readv\n4\nabcddone\n")
                .build(),
        );
        let result = t.readv("a", &[(1, 2), (0, 4), (1, 2)]).await.unwrap();
        assert_eq!(
            result,
            vec![
                (1, Bytes::from_static(b"bc")),
                (0, Bytes::from_static(b"abcd")),
                (1, Bytes::from_static(b"bc")),
            ]
        );
    }

    #[tokio::test]
    async fn test_readv_short_body() {
        let mut t = transport(
            Builder::new()
                .write(b"readv\x01a\n")
                .write(b"7\n0,1\n3,2done\n")
                .read(b"readv\n2\n03done\n")
                .build(),
        );
        let err = t.readv("a", &[(0, 1), (3, 2)]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::ShortReadv {
                offset: 3,
                length: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_append_and_stat() {
        let mut t = transport(
            Builder::new()
                .write(b"append\x01log\x01\n")
                .write(b"3\nabcdone\n")
                .read(b"appended\x015\n")
                .write(b"stat\x01log\n")
                .read(b"stat\x018\x010100644\n")
                .build(),
        );
        assert_eq!(t.append_bytes("log", b"abc", None).await.unwrap(), 5);
        let stat = t.stat("log").await.unwrap();
        assert_eq!(stat, Stat { size: 8, mode: 0o100644 });
    }

    #[tokio::test]
    async fn test_readv_empty_makes_no_call() {
        let mut t = transport(Builder::new().build());
        assert!(t.readv("a", &[]).await.unwrap().is_empty());
    }
}
