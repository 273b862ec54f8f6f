//! Client for the charm service.
//!
//! A [`Client`] speaks the SSH control plane for identity, linking and
//! bearer tokens, and the HTTP data plane for profiles, encrypt keys,
//! sequences and files. [`kv::Kv`] layers an end-to-end encrypted,
//! sequenced key-value store on top of both.

mod api;
mod client;
pub mod config;
mod crypt;
pub mod error;
mod fs;
pub mod identity;
pub mod kv;
mod link;
mod ring;
mod session;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, KeyType};
pub use error::ClientError;
pub use fs::FileContent;
pub use identity::Identity;
pub use link::LinkEvent;
pub use ring::{RingError, RingKey};
pub use session::CommandSession;
pub use transport::{ExecChannel, RusshTransport, Transport};
