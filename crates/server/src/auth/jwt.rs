use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::OffsetDateTime;

use common::crypto::SecretKey;
use common::protocol::Claims;

/// Clock skew tolerated when checking `exp`.
const LEEWAY_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("missing bearer token")]
    Missing,
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("signing key error: {0}")]
    Key(String),
}

/// Mints and verifies bearer tokens with the server's host key.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    audience: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(
        host_key: &SecretKey,
        audience: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, TokenError> {
        let der = host_key
            .to_pkcs8_der()
            .map_err(|e| TokenError::Key(e.to_string()))?;
        Ok(Self {
            encoding: EncodingKey::from_ed_der(&der),
            decoding: DecodingKey::from_ed_der(&host_key.public().to_bytes()),
            audience: audience.into(),
            ttl,
        })
    }

    /// The audience the data plane accepts.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Sign a token for `subject`. An empty `audiences` list means the default audience.
    pub fn issue(&self, subject: &str, audiences: &[String]) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let aud = if audiences.is_empty() {
            vec![self.audience.clone()]
        } else {
            audiences.to_vec()
        };
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            aud,
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::EdDSA), claims, &self.encoding)
            .map_err(TokenError::Invalid)
    }

    /// Check signature, expiry and audience.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = LEEWAY_SECS;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e),
            })
    }
}
