//! SSH control plane.
//!
//! Clients authenticate with a public key and run a single exec command per
//! channel. Each command reads and writes newline-delimited JSON and ends
//! with an exit status: 0 on success, 1 after an `{"error": ..}` line.

mod commands;
mod link;
mod session;
mod transport;

pub use commands::{ControlError, ControlPlane};
pub use link::{LinkBroker, LinkError};
pub use session::{Session, SessionContext};
pub use transport::{run, serve, SshServerError};
