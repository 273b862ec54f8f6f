use axum::routing::{get, post};
use axum::Router;

pub mod encrypt_key;
pub mod fs;
pub mod news;
pub mod seq;
pub mod user;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/id/:id", get(user::by_id_handler))
        .route("/bio/:name", get(user::by_name_handler))
        .route("/bio", post(user::set_name_handler))
        .route("/encrypt-key", post(encrypt_key::handler))
        .route(
            "/seq/:name",
            get(seq::get_handler).post(seq::next_handler),
        )
        .route(
            "/fs/*path",
            get(fs::get_handler)
                .post(fs::put_handler)
                .delete(fs::delete_handler),
        )
        .route("/news", get(news::list_handler))
        .route("/news/:id", get(news::item_handler))
        .with_state(state)
}
