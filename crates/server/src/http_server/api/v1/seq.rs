use axum::extract::{Json, Path, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use common::protocol::SeqResponse;

use crate::database::StoreError;
use crate::http_server::api::{error_response, AuthedUser};
use crate::ServiceState;

pub async fn get_handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SeqError> {
    let seq = state.database().get_seq(auth.user.id, &name).await?;
    Ok(Json(SeqResponse { seq }))
}

pub async fn next_handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SeqError> {
    let seq = state.database().next_seq(auth.user.id, &name).await?;
    tracing::debug!(charm_id = %auth.user.charm_id, name = %name, seq, "sequence advanced");
    Ok(Json(SeqResponse { seq }))
}

#[derive(Debug, thiserror::Error)]
pub enum SeqError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for SeqError {
    fn into_response(self) -> Response {
        tracing::error!("sequence request failed: {}", self);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}
