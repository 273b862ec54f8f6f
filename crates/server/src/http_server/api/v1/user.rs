use axum::extract::{Json, Path, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use common::protocol::{PublicKeyRecord, SetNameRequest, User};

use crate::database::{Database, StoreError, UserRecord};
use crate::http_server::api::{error_response, AuthedUser};
use crate::ServiceState;

/// Attach the account's oldest key, the one it was created with.
async fn with_key(db: &Database, record: UserRecord) -> Result<User, StoreError> {
    let key = db
        .keys_for_user(record.id)
        .await?
        .into_iter()
        .next()
        .map(PublicKeyRecord::from);
    Ok(record.into_user(key))
}

pub async fn by_id_handler(
    State(state): State<ServiceState>,
    _auth: AuthedUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, UserError> {
    let db = state.database();
    let record = db.user_by_charm_id(&id).await?;
    Ok(Json(with_key(db, record).await?))
}

pub async fn by_name_handler(
    State(state): State<ServiceState>,
    _auth: AuthedUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, UserError> {
    let db = state.database();
    let record = db.user_by_name(&name).await?;
    Ok(Json(with_key(db, record).await?))
}

pub async fn set_name_handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Json(req): Json<SetNameRequest>,
) -> Result<impl IntoResponse, UserError> {
    let db = state.database();
    let record = db.set_user_name(&auth.claims.sub, &req.name).await?;
    tracing::info!(charm_id = %record.charm_id, "display name set");
    Ok(Json(with_key(db, record).await?))
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        match self {
            UserError::Store(e @ StoreError::MissingUser) => {
                error_response(StatusCode::NOT_FOUND, e)
            }
            UserError::Store(e @ StoreError::NameTaken) => error_response(StatusCode::CONFLICT, e),
            UserError::Store(e @ StoreError::NameInvalid) => {
                error_response(StatusCode::BAD_REQUEST, e)
            }
            UserError::Store(e) => {
                tracing::error!("user request failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}
