//! # smartwire-client
//!
//! Client side of the smart protocol.
//!
//! This crate provides:
//! - Client mediums over TCP, SSH and pre-opened pipes
//! - A request object enforcing the write, read, done order
//! - The version-1 client protocol
//! - `RemoteTransport`, mapping file operations onto protocol calls

pub mod error;
pub mod medium;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use error::ClientError;
pub use medium::{ClientMedium, ClientRequest, MediumConfig, RequestState, SshParams};
pub use protocol::ClientProtocol;
pub use stream::MediumStream;
pub use transport::{coalesce_offsets, translate_error, CoalescedRange, RemoteTransport};
