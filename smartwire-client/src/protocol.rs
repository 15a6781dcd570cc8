//! Version-1 client protocol over a single request.

use crate::error::ClientError;
use crate::medium::ClientRequest;
use bytes::{Bytes, BytesMut};
use smartwire_protocol::{
    decode_tuple, encode_body, encode_tuple, serialise_offsets, LengthPrefixedBodyDecoder,
    ProtocolError, ReadvRange, PROTOCOL_VERSION,
};

/// Encodes calls and decodes responses for one request.
pub struct ClientProtocol<'m> {
    request: ClientRequest<'m>,
    body: Option<Bytes>,
}

impl<'m> ClientProtocol<'m> {
    pub fn new(request: ClientRequest<'m>) -> Self {
        Self {
            request,
            body: None,
        }
    }

    /// Sends a command line with no body.
    pub async fn call<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<(), ClientError> {
        self.write_args(args).await?;
        self.request.finished_writing().await
    }

    /// Sends a command line followed by a framed body.
    pub async fn call_with_body_bytes<A: AsRef<[u8]>>(
        &mut self,
        args: &[A],
        body: &[u8],
    ) -> Result<(), ClientError> {
        self.write_args(args).await?;
        self.request.accept_bytes(&encode_body(body)).await?;
        self.request.finished_writing().await
    }

    /// Sends a command line whose body lists `start,length` ranges.
    pub async fn call_with_body_readv_array<A: AsRef<[u8]>>(
        &mut self,
        args: &[A],
        ranges: &[ReadvRange],
    ) -> Result<(), ClientError> {
        self.call_with_body_bytes(args, &serialise_offsets(ranges))
            .await
    }

    async fn write_args<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<(), ClientError> {
        let line = encode_tuple(args)?;
        tracing::debug!(
            method = %args.first().map(|a| String::from_utf8_lossy(a.as_ref())).unwrap_or_default(),
            "sending request"
        );
        self.request.accept_bytes(&line).await
    }

    /// Reads the response tuple.
    ///
    /// Without `expect_body` the request is finished right away.
    pub async fn read_response_tuple(
        &mut self,
        expect_body: bool,
    ) -> Result<Vec<Bytes>, ClientError> {
        let result = self.read_tuple().await;
        let args = self.request.check(result)?;
        tracing::debug!(
            status = %args.first().map(|a| String::from_utf8_lossy(a)).unwrap_or_default(),
            "received response"
        );
        if !expect_body {
            self.request.finished_reading()?;
        }
        Ok(args)
    }

    async fn read_tuple(&mut self) -> Result<Vec<Bytes>, ClientError> {
        let mut line = BytesMut::new();
        loop {
            let byte = self.request.read_bytes(1).await?;
            if byte.is_empty() {
                if line.is_empty() {
                    return Err(ClientError::ConnectionClosed);
                }
                // Let the codec report the unterminated line.
                break;
            }
            line.extend_from_slice(&byte);
            if byte[0] == b'\n' {
                break;
            }
        }
        decode_tuple(&line)?.ok_or(ClientError::ConnectionClosed)
    }

    /// Reads from the response body.
    ///
    /// The whole body is pulled off the wire on the first call; `None`
    /// returns everything left, `Some(n)` at most `n` bytes of it.
    pub async fn read_body_bytes(&mut self, count: Option<usize>) -> Result<Bytes, ClientError> {
        let buffer = match self.body.take() {
            Some(buffer) => buffer,
            None => {
                let result = self.read_whole_body().await;
                self.request.check(result)?
            }
        };
        let mut buffer = buffer;
        let chunk = match count {
            Some(n) if n < buffer.len() => buffer.split_to(n),
            _ => std::mem::take(&mut buffer),
        };
        self.body = Some(buffer);
        Ok(chunk)
    }

    async fn read_whole_body(&mut self) -> Result<Bytes, ClientError> {
        let mut decoder = LengthPrefixedBodyDecoder::new();
        let mut body = BytesMut::new();
        while !decoder.finished_reading() {
            let bytes = self.request.read_bytes(decoder.next_read_size()).await?;
            if bytes.is_empty() {
                return Err(ClientError::ConnectionClosed);
            }
            decoder.accept_bytes(&bytes)?;
            body.extend_from_slice(&decoder.read_pending_data());
        }
        tracing::trace!(bytes = body.len(), "response body received");
        self.request.finished_reading()?;
        Ok(body.freeze())
    }

    /// Abandons the response body without reading it.
    ///
    /// Only safe when nothing further will arrive for this request, e.g.
    /// after an error status that never carries a body.
    pub fn cancel_read_body(&mut self) -> Result<(), ClientError> {
        self.request.finished_reading()
    }

    /// Sends `hello` and checks the server speaks version 1.
    pub async fn query_version(&mut self) -> Result<u32, ClientError> {
        self.call(&["hello"]).await?;
        let response = self.read_response_tuple(false).await?;
        match response.as_slice() {
            [status, version] if &status[..] == b"ok" => {
                let expected = PROTOCOL_VERSION.to_string();
                if version[..] == *expected.as_bytes() {
                    Ok(PROTOCOL_VERSION)
                } else {
                    Err(ProtocolError::UnsupportedVersion(
                        String::from_utf8_lossy(version).into_owned(),
                    )
                    .into())
                }
            }
            _ => Err(ClientError::UnexpectedResponse(format!(
                "bad hello reply: {:?}",
                response
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{ClientMedium, RequestState};
    use tokio_test::io::Builder;

    fn medium(mock: tokio_test::io::Mock) -> ClientMedium {
        let (reader, writer) = tokio::io::split(mock);
        ClientMedium::pipe(reader, writer)
    }

    #[tokio::test]
    async fn test_query_version() {
        let mut medium = medium(Builder::new().write(b"hello\n").read(b"ok\x011\n").build());
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        assert_eq!(protocol.query_version().await.unwrap(), 1);
        drop(protocol);
        assert!(!medium.has_outstanding_request());
    }

    #[tokio::test]
    async fn test_query_version_rejects_other_versions() {
        let mut medium = medium(Builder::new().write(b"hello\n").read(b"ok\x012\n").build());
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        assert!(matches!(
            protocol.query_version().await,
            Err(ClientError::Protocol(ProtocolError::UnsupportedVersion(_)))
        ));
    }

    #[tokio::test]
    async fn test_query_version_rejects_other_replies() {
        let mut medium = medium(
            Builder::new()
                .write(b"hello\n")
                .read(b"error\x01nope\n")
                .build(),
        );
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        assert!(matches!(
            protocol.query_version().await,
            Err(ClientError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_call_with_body_bytes() {
        let mut medium = medium(
            Builder::new()
                .write(b"put\x01foo.txt\x01\n")
                .write(b"2\nhidone\n")
                .read(b"ok\n")
                .build(),
        );
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol
            .call_with_body_bytes(&["put", "foo.txt", ""], b"hi")
            .await
            .unwrap();
        let response = protocol.read_response_tuple(false).await.unwrap();
        assert_eq!(response, vec![Bytes::from_static(b"ok")]);
    }

    #[tokio::test]
    async fn test_readv_array_body() {
        let mut medium = medium(
            Builder::new()
                .write(b"readv\x01a\n")
                .write(b"7\n0,1\n3,2done\n")
                .read(b"readv\n3\n034done\n")
                .build(),
        );
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol
            .call_with_body_readv_array(
                &["readv", "a"],
                &[ReadvRange::new(0, 1), ReadvRange::new(3, 2)],
            )
            .await
            .unwrap();
        let response = protocol.read_response_tuple(true).await.unwrap();
        assert_eq!(&response[0][..], b"readv");
        assert_eq!(&protocol.read_body_bytes(None).await.unwrap()[..], b"034");
    }

    #[tokio::test]
    async fn test_read_body_in_pieces() {
        let mut medium = medium(
            Builder::new()
                .write(b"get\x01f\n")
                .read(b"ok\n")
                .read(b"5\nhel")
                .read(b"lodone\n")
                .build(),
        );
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol.call(&["get", "f"]).await.unwrap();
        protocol.read_response_tuple(true).await.unwrap();
        assert_eq!(&protocol.read_body_bytes(Some(2)).await.unwrap()[..], b"he");
        assert_eq!(&protocol.read_body_bytes(Some(2)).await.unwrap()[..], b"ll");
        assert_eq!(&protocol.read_body_bytes(None).await.unwrap()[..], b"o");
        assert!(protocol.read_body_bytes(None).await.unwrap().is_empty());
        drop(protocol);
        assert!(!medium.has_outstanding_request());
    }

    #[tokio::test]
    async fn test_cancel_read_body() {
        let mut medium = medium(
            Builder::new()
                .write(b"get\x01f\n")
                .read(b"NoSuchFile\x01f\n")
                .build(),
        );
        let mut request = medium.get_request().unwrap();
        request.accept_bytes(b"get\x01f\n").await.unwrap();
        let mut protocol = ClientProtocol::new(request);
        protocol.request.finished_writing().await.unwrap();
        let response = protocol.read_response_tuple(true).await.unwrap();
        assert_eq!(&response[0][..], b"NoSuchFile");
        assert_eq!(protocol.request.state(), RequestState::Reading);
        protocol.cancel_read_body().unwrap();
        assert_eq!(protocol.request.state(), RequestState::Done);
    }

    #[tokio::test]
    async fn test_eof_before_response() {
        let mut medium = medium(Builder::new().write(b"hello\n").build());
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol.call(&["hello"]).await.unwrap();
        assert!(matches!(
            protocol.read_response_tuple(false).await,
            Err(ClientError::ConnectionClosed)
        ));
        assert_eq!(protocol.request.state(), RequestState::Done);
        drop(protocol);

        // The dead pipe is dropped; the next call is refused as unconnected,
        // not as a second outstanding request.
        assert!(!medium.is_connected());
        assert!(!medium.has_outstanding_request());
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        let err = protocol.call(&["hello"]).await.unwrap_err();
        assert!(matches!(err, ClientError::MediumNotConnected));
    }

    #[tokio::test]
    async fn test_bad_trailer() {
        let mut medium = medium(
            Builder::new()
                .write(b"get\x01f\n")
                .read(b"ok\n1\nxDONE\n")
                .build(),
        );
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol.call(&["get", "f"]).await.unwrap();
        protocol.read_response_tuple(true).await.unwrap();
        assert!(matches!(
            protocol.read_body_bytes(None).await,
            Err(ClientError::Protocol(ProtocolError::BadTrailer(_)))
        ));
        drop(protocol);
        assert!(!medium.is_connected());
        assert!(!medium.has_outstanding_request());
        assert!(medium.get_request().is_ok());
    }

    #[tokio::test]
    async fn test_unterminated_response_drops_connection() {
        let mut medium = medium(Builder::new().write(b"hello\n").read(b"ok\x011").build());
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol.call(&["hello"]).await.unwrap();
        assert!(matches!(
            protocol.read_response_tuple(false).await,
            Err(ClientError::Protocol(_))
        ));
        drop(protocol);
        assert!(!medium.is_connected());
        assert!(!medium.has_outstanding_request());
    }

    #[tokio::test]
    async fn test_argument_with_separator_is_rejected() {
        let mut medium = medium(Builder::new().build());
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        assert!(matches!(
            protocol.call(&["has", "a\nb"]).await,
            Err(ClientError::Protocol(ProtocolError::InvalidArgument { .. }))
        ));
    }
}
