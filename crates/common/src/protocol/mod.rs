//! Wire types shared by the server and the client.
//!
//! SSH commands answer with newline-delimited JSON built from these types;
//! the HTTP data plane uses the same structs as request and response bodies.

mod auth;
mod fs;
mod keys;
mod link;
mod news;
mod seq;
mod user;

pub use auth::{Auth, Claims, EncryptKey, EncryptKeyUpload, DEFAULT_AUDIENCE};
pub use fs::FileInfo;
pub use keys::{Keys, PublicKeyRecord, UnlinkRequest};
pub use link::{LinkAnswer, LinkMessage, LinkResponse, LinkStatus, TOKEN_ALPHABET, TOKEN_LENGTH};
pub use news::{News, NewsSummary};
pub use seq::SeqResponse;
pub use user::{SetNameRequest, User};

use serde::{Deserialize, Serialize};

/// Terminal error line written on an SSH session before a non-zero exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}
