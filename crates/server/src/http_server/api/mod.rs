use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http::StatusCode;

use common::protocol::ErrorMessage;

mod authed;
pub mod v1;

pub use authed::{AuthError, AuthedUser};

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/v1", v1::router(state.clone()))
        .with_state(state)
}

/// `{"error": ..}` body with the given status.
pub(crate) fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(ErrorMessage::new(message))).into_response()
}
