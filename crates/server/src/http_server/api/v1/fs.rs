use axum::extract::multipart::MultipartError;
use axum::extract::{Json, Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use http::header::CONTENT_TYPE;
use http::StatusCode;
use serde::Deserialize;

use crate::files::{FileEntry, FileStoreError};
use crate::http_server::api::{error_response, AuthedUser};
use crate::ServiceState;

const DATA_PART: &str = "data";

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// permission bits in octal, e.g. `600`
    #[serde(default)]
    pub mode: Option<String>,
}

pub async fn get_handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Path(path): Path<String>,
) -> Result<Response, FsError> {
    match state.files().get(&auth.user.charm_id, &path).await? {
        FileEntry::File(data) => {
            Ok(([(CONTENT_TYPE, "application/octet-stream")], data).into_response())
        }
        FileEntry::Dir(entries) => Ok(Json(entries).into_response()),
    }
}

pub async fn put_handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Path(path): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, FsError> {
    let mode = query
        .mode
        .as_deref()
        .map(|m| u32::from_str_radix(m, 8).map_err(|_| FsError::BadMode(m.to_string())))
        .transpose()?;

    let mut data = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(DATA_PART) {
            data = Some(field.bytes().await?);
        }
    }
    let data = data.ok_or(FsError::MissingData)?;

    state
        .files()
        .put(&auth.user.charm_id, &path, &data, mode)
        .await?;
    tracing::debug!(charm_id = %auth.user.charm_id, path = %path, size = data.len(), "file stored");
    Ok(Json(serde_json::json!({ "path": path, "size": data.len() })))
}

pub async fn delete_handler(
    State(state): State<ServiceState>,
    auth: AuthedUser,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, FsError> {
    state.files().delete(&auth.user.charm_id, &path).await?;
    Ok(Json(serde_json::json!({ "path": path })))
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error(transparent)]
    Store(#[from] FileStoreError),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("missing multipart part `data`")]
    MissingData,
    #[error("invalid mode: {0}")]
    BadMode(String),
}

impl IntoResponse for FsError {
    fn into_response(self) -> Response {
        match self {
            FsError::Store(e @ FileStoreError::BadPath(_)) => {
                error_response(StatusCode::BAD_REQUEST, e)
            }
            FsError::Store(e @ FileStoreError::NotFound) => error_response(StatusCode::NOT_FOUND, e),
            FsError::Store(e) => {
                tracing::error!("file store failure: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
            FsError::Multipart(_) | FsError::MissingData | FsError::BadMode(_) => {
                error_response(StatusCode::BAD_REQUEST, self)
            }
        }
    }
}
