use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::protocol::ErrorMessage;

pub async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorMessage::new("not found"))).into_response()
}
