use std::fmt;

use serde::{Deserialize, Serialize};

/// Characters a link token is drawn from. Ambiguous glyphs are left out.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFHJKLMNPRSTUWXY369";
pub const TOKEN_LENGTH: usize = 6;

/// Status carried by every message of the linking handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Init,
    TokenCreated,
    TokenSent,
    ValidTokenRequest,
    InvalidTokenRequest,
    Requested,
    RequestDenied,
    SameUser,
    Success,
    TimedOut,
    Error,
}

impl LinkStatus {
    /// Whether the handshake ends with this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkStatus::InvalidTokenRequest
                | LinkStatus::RequestDenied
                | LinkStatus::SameUser
                | LinkStatus::Success
                | LinkStatus::TimedOut
                | LinkStatus::Error
        )
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Init => "init",
            LinkStatus::TokenCreated => "token_created",
            LinkStatus::TokenSent => "token_sent",
            LinkStatus::ValidTokenRequest => "valid_token_request",
            LinkStatus::InvalidTokenRequest => "invalid_token_request",
            LinkStatus::Requested => "requested",
            LinkStatus::RequestDenied => "request_denied",
            LinkStatus::SameUser => "same_user",
            LinkStatus::Success => "success",
            LinkStatus::TimedOut => "timed_out",
            LinkStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMessage {
    pub status: LinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_addr: Option<String>,
}

impl LinkMessage {
    pub fn status(status: LinkStatus) -> Self {
        Self {
            status,
            token: None,
            request_public_key: None,
            request_addr: None,
        }
    }

    pub fn with_token(status: LinkStatus, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::status(status)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAnswer {
    Yes,
    No,
}

/// The generator's approval, written on its session input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkResponse {
    pub response: LinkAnswer,
}

impl LinkResponse {
    pub fn approve(approved: bool) -> Self {
        Self {
            response: if approved {
                LinkAnswer::Yes
            } else {
                LinkAnswer::No
            },
        }
    }
}
