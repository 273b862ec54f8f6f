//! Bearer tokens.
//!
//! Tokens are EdDSA-signed JWTs minted by the SSH control plane with the
//! server's host key and checked by the HTTP data plane on every request.
//! There is no revocation list; the short expiry is the revocation mechanism.

mod jwt;

pub use jwt::{TokenError, TokenIssuer};
