use axum::extract::{Json, Path, Query, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Deserialize;

use crate::database::StoreError;
use crate::http_server::api::{error_response, AuthedUser};
use crate::ServiceState;

#[derive(Debug, Default, Deserialize)]
pub struct NewsQuery {
    /// comma separated
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

impl NewsQuery {
    fn tags(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

pub async fn list_handler(
    State(state): State<ServiceState>,
    _auth: AuthedUser,
    Query(query): Query<NewsQuery>,
) -> Result<impl IntoResponse, NewsError> {
    let page = query.page.unwrap_or(1);
    let items = state.database().news_list(&query.tags(), page).await?;
    Ok(Json(items))
}

pub async fn item_handler(
    State(state): State<ServiceState>,
    _auth: AuthedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, NewsError> {
    match state.database().news(id).await? {
        Some(news) => Ok(Json(news)),
        None => Err(NewsError::NotFound(id)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NewsError {
    #[error("news item {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for NewsError {
    fn into_response(self) -> Response {
        match self {
            NewsError::NotFound(_) => error_response(StatusCode::NOT_FOUND, self),
            NewsError::Store(e) => {
                tracing::error!("news request failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}
