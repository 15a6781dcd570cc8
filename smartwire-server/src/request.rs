//! Request handler contract and the method-name registry.

use crate::backing::Transport;
use crate::error::ServerError;
use bytes::Bytes;
use smartwire_protocol::SmartResponse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Outcome of running a handler on its command arguments.
#[derive(Debug)]
pub enum Dispatch {
    /// The handler is done; send this response.
    Respond(SmartResponse),
    /// The handler needs the request body before it can respond.
    ReadBody,
}

/// Logic for one request method.
///
/// A fresh handler is built for every request. `execute` is called exactly
/// once with the decoded arguments (method name excluded). If it returns
/// [`Dispatch::ReadBody`], `do_body` is called once with the complete body.
pub trait RequestHandler: Send {
    fn execute(&mut self, args: &[Bytes]) -> Result<Dispatch, ServerError>;

    fn do_body(&mut self, _body: Bytes) -> Result<SmartResponse, ServerError> {
        Err(ServerError::InvalidRequest(
            "request does not take a body".to_string(),
        ))
    }
}

/// Builds a handler bound to the backing transport.
pub type HandlerFactory =
    Arc<dyn Fn(Arc<dyn Transport>) -> Box<dyn RequestHandler> + Send + Sync>;

/// Mapping from method name to handler factory.
///
/// Registries are plain values so several servers with different command
/// sets can live in one process.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    handlers: HashMap<Vec<u8>, HandlerFactory>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the file-level VFS commands.
    pub fn vfs() -> Self {
        let mut registry = Self::new();
        crate::vfs::register(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, method: &str, factory: F)
    where
        F: Fn(Arc<dyn Transport>) -> Box<dyn RequestHandler> + Send + Sync + 'static,
    {
        self.handlers
            .insert(method.as_bytes().to_vec(), Arc::new(factory));
    }

    pub fn contains(&self, method: &[u8]) -> bool {
        self.handlers.contains_key(method)
    }

    /// Builds a handler for `method`.
    pub fn create(
        &self,
        method: &[u8],
        transport: Arc<dyn Transport>,
    ) -> Result<Box<dyn RequestHandler>, ServerError> {
        let factory = self.handlers.get(method).ok_or_else(|| {
            ServerError::UnknownMethod(String::from_utf8_lossy(method).into_owned())
        })?;
        Ok(factory(transport))
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

/// Checks the argument count for `method`.
pub fn expect_args(method: &'static str, args: &[Bytes], expected: usize) -> Result<(), ServerError> {
    if args.len() != expected {
        return Err(ServerError::BadArguments {
            method,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}
