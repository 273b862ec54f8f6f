use reqwest::StatusCode;

use common::crypto::{KeyError, PasswordSealError, SealError};

use crate::config::ConfigError;
use crate::ring::RingError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("session ended unexpectedly")]
    UnexpectedEof,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),

    #[error("user not found")]
    MissingUser,
    #[error("name already taken")]
    NameTaken,
    #[error("invalid name")]
    NameInvalid,
    #[error("could not unlink key")]
    CouldNotUnlinkKey,

    #[error("link request timed out")]
    LinkTimeout,
    #[error("link request denied")]
    LinkDenied,
    #[error("invalid link token")]
    LinkInvalidToken,
    #[error("link failed: {0}")]
    Link(String),

    #[error("file not found")]
    NotFound,
    #[error("invalid path: {0}")]
    BadPath(String),
}

impl From<SealError> for ClientError {
    fn from(e: SealError) -> Self {
        ClientError::Ring(RingError::Seal(e))
    }
}

impl From<PasswordSealError> for ClientError {
    fn from(e: PasswordSealError) -> Self {
        ClientError::Ring(RingError::Crypt(e))
    }
}
