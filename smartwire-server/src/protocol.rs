//! Version-1 server protocol: one request, one response.
//!
//! A `ServerProtocol` is a synchronous state machine. The medium feeds it
//! bytes, drains the encoded response from it and collects the bytes that
//! arrived after the request ended.

use crate::backing::Transport;
use crate::error::ServerError;
use crate::request::{Dispatch, RequestHandler, RequestRegistry};
use bytes::{Bytes, BytesMut};
use smartwire_protocol::{
    decode_tuple, split_line, LengthPrefixedBodyDecoder, ProtocolError, SmartResponse,
    MAX_LINE_LENGTH,
};
use std::sync::Arc;

/// Sent if a response cannot be encoded at all.
const ENCODING_FAILURE: &[u8] = b"error\x01response could not be encoded\n";

fn line_too_long(size: usize) -> ServerError {
    ProtocolError::LineTooLong {
        size,
        max: MAX_LINE_LENGTH,
    }
    .into()
}

enum State {
    AwaitingCommand,
    ReadingBody {
        method: String,
        handler: Box<dyn RequestHandler>,
        decoder: LengthPrefixedBodyDecoder,
        body: BytesMut,
    },
    Responded,
}

/// Server side of one request.
pub struct ServerProtocol {
    registry: Arc<RequestRegistry>,
    transport: Arc<dyn Transport>,
    state: State,
    in_buffer: BytesMut,
    excess: BytesMut,
    output: BytesMut,
}

impl ServerProtocol {
    pub fn new(registry: Arc<RequestRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            state: State::AwaitingCommand,
            in_buffer: BytesMut::new(),
            excess: BytesMut::new(),
            output: BytesMut::new(),
        }
    }

    /// Feeds bytes received from the peer.
    ///
    /// Returns an error only for framing violations, which leave the
    /// connection unusable. An `error` response has been queued by then if
    /// none was sent yet.
    pub fn accept_bytes(&mut self, bytes: &[u8]) -> Result<(), ServerError> {
        match std::mem::replace(&mut self.state, State::Responded) {
            State::Responded => {
                self.excess.extend_from_slice(bytes);
                Ok(())
            }
            State::AwaitingCommand => {
                self.in_buffer.extend_from_slice(bytes);
                match split_line(&mut self.in_buffer) {
                    Some(line) if line.len() <= MAX_LINE_LENGTH => self.dispatch(&line),
                    Some(line) => Err(self.fail_connection(line_too_long(line.len()))),
                    None if self.in_buffer.len() > MAX_LINE_LENGTH => {
                        Err(self.fail_connection(line_too_long(self.in_buffer.len())))
                    }
                    None => {
                        self.state = State::AwaitingCommand;
                        Ok(())
                    }
                }
            }
            State::ReadingBody {
                method,
                handler,
                decoder,
                body,
            } => self.feed_body(method, handler, decoder, body, bytes),
        }
    }

    fn dispatch(&mut self, line: &[u8]) -> Result<(), ServerError> {
        let args = match decode_tuple(line) {
            Ok(Some(args)) => args,
            Ok(None) => Vec::new(),
            Err(e) => return Err(self.fail_connection(e.into())),
        };
        let Some((method_raw, params)) = args.split_first() else {
            return Err(self.fail_connection(ServerError::InvalidRequest(
                "empty command line".to_string(),
            )));
        };
        let method = String::from_utf8_lossy(method_raw).into_owned();
        tracing::debug!(method = %method, "dispatching request");

        let outcome = self
            .registry
            .create(method_raw, self.transport.clone())
            .and_then(|mut handler| handler.execute(params).map(|d| (d, handler)));

        match outcome {
            Ok((Dispatch::Respond(response), _)) => {
                self.send_response(&method, &response);
                self.excess.unsplit(self.in_buffer.split());
                Ok(())
            }
            Ok((Dispatch::ReadBody, handler)) => {
                let rest = self.in_buffer.split();
                self.feed_body(
                    method,
                    handler,
                    LengthPrefixedBodyDecoder::new(),
                    BytesMut::new(),
                    &rest,
                )
            }
            Err(e) => {
                tracing::debug!(method = %method, error = %e, "request failed");
                self.send_response(&method, &e.to_response());
                self.excess.unsplit(self.in_buffer.split());
                Ok(())
            }
        }
    }

    fn feed_body(
        &mut self,
        method: String,
        mut handler: Box<dyn RequestHandler>,
        mut decoder: LengthPrefixedBodyDecoder,
        mut body: BytesMut,
        bytes: &[u8],
    ) -> Result<(), ServerError> {
        if let Err(e) = decoder.accept_bytes(bytes) {
            return Err(self.fail_connection(e.into()));
        }
        body.extend_from_slice(&decoder.read_pending_data());

        if !decoder.finished_reading() {
            self.state = State::ReadingBody {
                method,
                handler,
                decoder,
                body,
            };
            return Ok(());
        }

        tracing::trace!(method = %method, bytes = body.len(), "request body received");
        self.excess.extend_from_slice(decoder.unused_data());
        let response = handler
            .do_body(body.freeze())
            .unwrap_or_else(|e| {
                tracing::debug!(method = %method, error = %e, "request failed");
                e.to_response()
            });
        self.send_response(&method, &response);
        Ok(())
    }

    /// Queues an `error` response and ends the request.
    ///
    /// Only reachable before a response was sent.
    fn fail_connection(&mut self, err: ServerError) -> ServerError {
        tracing::debug!(error = %err, "framing error");
        let encoded = err
            .to_response()
            .encode()
            .unwrap_or_else(|_| BytesMut::from(ENCODING_FAILURE));
        self.output.unsplit(encoded);
        self.state = State::Responded;
        err
    }

    fn send_response(&mut self, method: &str, response: &SmartResponse) {
        let encoded = match response.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(method = %method, error = %e, "handler produced an unencodable response");
                ServerError::from(e)
                    .to_response()
                    .encode()
                    .unwrap_or_else(|_| BytesMut::from(ENCODING_FAILURE))
            }
        };
        tracing::debug!(
            method = %method,
            status = %String::from_utf8_lossy(response.status()),
            "sending response"
        );
        self.output.unsplit(encoded);
        self.state = State::Responded;
    }

    /// Bytes still wanted for this request; zero once the response is queued.
    pub fn next_read_size(&self) -> usize {
        match &self.state {
            State::Responded => 0,
            State::ReadingBody { decoder, .. } => decoder.next_read_size(),
            State::AwaitingCommand => 1,
        }
    }

    /// Whether a response has been queued.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Responded)
    }

    /// True while no byte of a request has arrived yet.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingCommand) && self.in_buffer.is_empty()
    }

    /// Takes the encoded response bytes queued so far.
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Takes the bytes received after this request ended.
    pub fn take_excess(&mut self) -> BytesMut {
        self.excess.split()
    }
}
