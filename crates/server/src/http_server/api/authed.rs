use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use http::header::AUTHORIZATION;
use http::request::Parts;
use http::StatusCode;

use common::protocol::Claims;

use super::error_response;
use crate::auth::TokenError;
use crate::database::{StoreError, UserRecord};
use crate::ServiceState;

/// The account behind a valid `Authorization: bearer <jwt>` header.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub claims: Claims,
    pub user: UserRecord,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::Token(e) => {
                tracing::debug!("rejecting bearer token: {}", e);
                error_response(StatusCode::UNAUTHORIZED, e)
            }
            // the account was deleted after the token was minted
            AuthError::Store(StoreError::MissingUser) => {
                error_response(StatusCode::UNAUTHORIZED, StoreError::MissingUser)
            }
            AuthError::Store(e) => {
                tracing::error!("failed to load token subject: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, TokenError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(TokenError::Missing)?;
    let (scheme, token) = header.trim().split_once(' ').ok_or(TokenError::Missing)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(TokenError::Missing);
    }
    Ok(token.trim())
}

#[async_trait]
impl FromRequestParts<ServiceState> for AuthedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let claims = state.tokens().validate(bearer_token(parts)?)?;
        let user = state.database().user_by_charm_id(&claims.sub).await?;
        Ok(AuthedUser { claims, user })
    }
}
