use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Audience used when `jwt` is invoked without arguments.
pub const DEFAULT_AUDIENCE: &str = "charm";

/// Bearer token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub aud: Vec<String>,
}

/// One server-held ciphertext of a ring key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptKey {
    /// Stable identifier shared by every ciphertext of the same ring key.
    pub global_id: String,
    /// Sealed key bytes, base64 encoded.
    pub encrypted_key: String,
    /// The `authorized_keys` form of the key this copy is sealed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Body of `POST /v1/encrypt-key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptKeyUpload {
    pub public_key: String,
    pub global_id: String,
    pub encrypted_key: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Response of the `api-auth` SSH command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub jwt: String,
    pub id: String,
    pub http_scheme: String,
    pub public_key: String,
    pub encrypt_keys: Vec<EncryptKey>,
}
