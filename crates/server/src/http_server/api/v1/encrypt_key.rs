use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use common::crypto::AuthorizedKey;
use common::protocol::{EncryptKey, EncryptKeyUpload};

use crate::database::StoreError;
use crate::http_server::api::{error_response, AuthedUser};
use crate::ServiceState;

pub async fn handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Json(req): Json<EncryptKeyUpload>,
) -> Result<impl IntoResponse, EncryptKeyError> {
    let limit = state.settings().max_encrypt_key_size;
    if req.encrypted_key.len() > limit {
        return Err(EncryptKeyError::TooLarge(limit));
    }
    let public_key: AuthorizedKey = req
        .public_key
        .parse()
        .map_err(|e| EncryptKeyError::BadKey(format!("{}", e)))?;

    state
        .database()
        .add_encrypt_key(
            auth.user.id,
            &public_key,
            &req.global_id,
            &req.encrypted_key,
            req.created_at,
        )
        .await?;

    Ok(Json(EncryptKey {
        global_id: req.global_id,
        encrypted_key: req.encrypted_key,
        public_key: Some(public_key.to_authorized()),
        created_at: req.created_at,
    }))
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptKeyError {
    #[error("encrypted key exceeds {0} bytes")]
    TooLarge(usize),
    #[error("invalid public key: {0}")]
    BadKey(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for EncryptKeyError {
    fn into_response(self) -> Response {
        match self {
            EncryptKeyError::TooLarge(_) => error_response(StatusCode::PAYLOAD_TOO_LARGE, self),
            EncryptKeyError::BadKey(_) => error_response(StatusCode::BAD_REQUEST, self),
            EncryptKeyError::Store(e @ StoreError::KeyNotLinked) => {
                error_response(StatusCode::BAD_REQUEST, e)
            }
            EncryptKeyError::Store(e) => {
                tracing::error!("failed to store encrypt key: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}
