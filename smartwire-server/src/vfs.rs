//! File-level request handlers over a backing transport.

use crate::backing::Transport;
use crate::error::ServerError;
use crate::request::{expect_args, Dispatch, RequestHandler, RequestRegistry};
use bytes::Bytes;
use smartwire_protocol::{
    deserialise_flag, deserialise_mode, deserialise_offsets, SmartResponse, TransportError,
};
use std::sync::Arc;

/// Methods served by [`VfsHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsMethod {
    Hello,
    Has,
    Get,
    Put,
    PutNonAtomic,
    Append,
    Delete,
    Mkdir,
    Rmdir,
    Rename,
    Move,
    Stat,
    Readv,
    ListDir,
    IterFilesRecursive,
}

impl VfsMethod {
    pub const ALL: [VfsMethod; 15] = [
        VfsMethod::Hello,
        VfsMethod::Has,
        VfsMethod::Get,
        VfsMethod::Put,
        VfsMethod::PutNonAtomic,
        VfsMethod::Append,
        VfsMethod::Delete,
        VfsMethod::Mkdir,
        VfsMethod::Rmdir,
        VfsMethod::Rename,
        VfsMethod::Move,
        VfsMethod::Stat,
        VfsMethod::Readv,
        VfsMethod::ListDir,
        VfsMethod::IterFilesRecursive,
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            VfsMethod::Hello => "hello",
            VfsMethod::Has => "has",
            VfsMethod::Get => "get",
            VfsMethod::Put => "put",
            VfsMethod::PutNonAtomic => "put_non_atomic",
            VfsMethod::Append => "append",
            VfsMethod::Delete => "delete",
            VfsMethod::Mkdir => "mkdir",
            VfsMethod::Rmdir => "rmdir",
            VfsMethod::Rename => "rename",
            VfsMethod::Move => "move",
            VfsMethod::Stat => "stat",
            VfsMethod::Readv => "readv",
            VfsMethod::ListDir => "list_dir",
            VfsMethod::IterFilesRecursive => "iter_files_recursive",
        }
    }
}

/// Registers every VFS method.
pub fn register(registry: &mut RequestRegistry) {
    for method in VfsMethod::ALL {
        registry.register(method.as_str(), move |transport| {
            Box::new(VfsHandler::new(method, transport))
        });
    }
}

/// State kept between `execute` and `do_body` for body-taking methods.
#[derive(Debug)]
enum PendingBody {
    Put {
        path: String,
        mode: Option<u32>,
    },
    PutNonAtomic {
        path: String,
        mode: Option<u32>,
        create_parent: bool,
        dir_mode: Option<u32>,
    },
    Append {
        path: String,
        mode: Option<u32>,
    },
    Readv {
        path: String,
    },
}

/// Handler for one VFS request.
pub struct VfsHandler {
    method: VfsMethod,
    transport: Arc<dyn Transport>,
    pending: Option<PendingBody>,
}

impl VfsHandler {
    pub fn new(method: VfsMethod, transport: Arc<dyn Transport>) -> Self {
        Self {
            method,
            transport,
            pending: None,
        }
    }

    fn expect(&self, args: &[Bytes], n: usize) -> Result<(), ServerError> {
        expect_args(self.method.as_str(), args, n)
    }

    fn read_body(&mut self, pending: PendingBody) -> Result<Dispatch, ServerError> {
        self.pending = Some(pending);
        Ok(Dispatch::ReadBody)
    }
}

fn respond(response: SmartResponse) -> Result<Dispatch, ServerError> {
    Ok(Dispatch::Respond(response))
}

/// Decodes a path argument. Non-UTF-8 paths are reported as a decode error.
fn path_arg(raw: &Bytes) -> Result<String, ServerError> {
    match std::str::from_utf8(raw) {
        Ok(path) => Ok(path.to_string()),
        Err(e) => Err(TransportError::from_utf8_error(raw, e).into()),
    }
}

fn names(names: Vec<String>) -> SmartResponse {
    let mut args = Vec::with_capacity(names.len() + 1);
    args.push(Bytes::from_static(b"names"));
    args.extend(names.into_iter().map(Bytes::from));
    SmartResponse::from_args(args)
}

impl RequestHandler for VfsHandler {
    fn execute(&mut self, args: &[Bytes]) -> Result<Dispatch, ServerError> {
        let t = self.transport.clone();
        match self.method {
            VfsMethod::Hello => {
                self.expect(args, 0)?;
                respond(SmartResponse::new(&["ok", "1"]))
            }
            VfsMethod::Has => {
                self.expect(args, 1)?;
                let answer = if t.has(&path_arg(&args[0])?)? { "yes" } else { "no" };
                respond(SmartResponse::new(&[answer]))
            }
            VfsMethod::Get => {
                self.expect(args, 1)?;
                let data = t.get_bytes(&path_arg(&args[0])?)?;
                respond(SmartResponse::ok().with_body(data))
            }
            VfsMethod::Put => {
                self.expect(args, 2)?;
                self.read_body(PendingBody::Put {
                    path: path_arg(&args[0])?,
                    mode: deserialise_mode(&args[1])?,
                })
            }
            VfsMethod::PutNonAtomic => {
                self.expect(args, 4)?;
                self.read_body(PendingBody::PutNonAtomic {
                    path: path_arg(&args[0])?,
                    mode: deserialise_mode(&args[1])?,
                    create_parent: deserialise_flag(&args[2]),
                    dir_mode: deserialise_mode(&args[3])?,
                })
            }
            VfsMethod::Append => {
                self.expect(args, 2)?;
                self.read_body(PendingBody::Append {
                    path: path_arg(&args[0])?,
                    mode: deserialise_mode(&args[1])?,
                })
            }
            VfsMethod::Delete => {
                self.expect(args, 1)?;
                t.delete(&path_arg(&args[0])?)?;
                respond(SmartResponse::ok())
            }
            VfsMethod::Mkdir => {
                self.expect(args, 2)?;
                t.mkdir(&path_arg(&args[0])?, deserialise_mode(&args[1])?)?;
                respond(SmartResponse::ok())
            }
            VfsMethod::Rmdir => {
                self.expect(args, 1)?;
                t.rmdir(&path_arg(&args[0])?)?;
                respond(SmartResponse::ok())
            }
            VfsMethod::Rename => {
                self.expect(args, 2)?;
                t.rename(&path_arg(&args[0])?, &path_arg(&args[1])?)?;
                respond(SmartResponse::ok())
            }
            VfsMethod::Move => {
                self.expect(args, 2)?;
                t.move_path(&path_arg(&args[0])?, &path_arg(&args[1])?)?;
                respond(SmartResponse::ok())
            }
            VfsMethod::Stat => {
                self.expect(args, 1)?;
                let stat = t.stat(&path_arg(&args[0])?)?;
                respond(SmartResponse::from_args(stat.to_response_args()))
            }
            VfsMethod::Readv => {
                self.expect(args, 1)?;
                self.read_body(PendingBody::Readv {
                    path: path_arg(&args[0])?,
                })
            }
            VfsMethod::ListDir => {
                self.expect(args, 1)?;
                respond(names(t.list_dir(&path_arg(&args[0])?)?))
            }
            VfsMethod::IterFilesRecursive => {
                self.expect(args, 1)?;
                respond(names(t.iter_files_recursive(&path_arg(&args[0])?)?))
            }
        }
    }

    fn do_body(&mut self, body: Bytes) -> Result<SmartResponse, ServerError> {
        let t = &self.transport;
        match self.pending.take() {
            Some(PendingBody::Put { path, mode }) => {
                t.put_bytes(&path, &body, mode)?;
                Ok(SmartResponse::ok())
            }
            Some(PendingBody::PutNonAtomic {
                path,
                mode,
                create_parent,
                dir_mode,
            }) => {
                t.put_bytes_non_atomic(&path, &body, mode, create_parent, dir_mode)?;
                Ok(SmartResponse::ok())
            }
            Some(PendingBody::Append { path, mode }) => {
                let old_len = t.append_bytes(&path, &body, mode)?;
                Ok(SmartResponse::new(&["appended".to_string(), old_len.to_string()]))
            }
            Some(PendingBody::Readv { path }) => {
                let ranges = deserialise_offsets(&body)?;
                let parts = t.readv(&path, &ranges)?;
                let total: usize = parts.iter().map(Bytes::len).sum();
                let mut data = Vec::with_capacity(total);
                for part in &parts {
                    data.extend_from_slice(part);
                }
                Ok(SmartResponse::new(&["readv"]).with_body(data))
            }
            None => Err(ServerError::UnexpectedBody(self.method.as_str())),
        }
    }
}
