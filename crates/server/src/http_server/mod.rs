use std::iter::once;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use http::Method;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

pub mod api;
mod config;
mod handlers;
mod health;

pub use config::Config;

use crate::ServiceState;

const STATUS_PREFIX: &str = "/_status";

/// Maximum upload size in bytes (100 MB)
pub const MAX_UPLOAD_SIZE_BYTES: usize = 100 * 1024 * 1024;

/// All routes of the data plane, without the tracing layer.
pub fn router(state: ServiceState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE])
        .allow_headers(vec![ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN])
        .allow_origin(Any);

    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .merge(api::router(state.clone()))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE_BYTES))
        .layer(cors)
        .layer(SetSensitiveRequestHeadersLayer::new(once(AUTHORIZATION)))
        .with_state(state)
}

/// Bind the configured address and serve until shutdown.
pub async fn run(
    config: Config,
    state: ServiceState,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = ?config.listen_addr, "HTTP server listening");
    serve(listener, config.log_level, state, shutdown_rx).await
}

/// Serve the data plane on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    log_level: tracing::Level,
    state: ServiceState,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    let app = router(state).layer(trace_layer);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use common::crypto::{AuthorizedKey, SecretKey};
    use common::protocol::{EncryptKeyUpload, ErrorMessage, FileInfo, SeqResponse, User};

    use super::*;
    use crate::database::Database;
    use crate::service_state::ServiceSettings;

    struct Harness {
        state: ServiceState,
        key: AuthorizedKey,
        token: String,
        _files: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let files = tempfile::tempdir().unwrap();
            let state = ServiceState::new(
                Database::in_memory().await.unwrap(),
                &SecretKey::generate(),
                ServiceSettings::default(),
                files.path(),
            )
            .unwrap();
            let key = AuthorizedKey::from(&SecretKey::generate().public());
            let user = state.database().user_for_key(&key, true).await.unwrap();
            let token = state.tokens().issue(&user.charm_id, &[]).unwrap();
            Self {
                state,
                key,
                token,
                _files: files,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, body.to_vec())
        }

        fn authed(&self, method: Method, uri: &str) -> http::request::Builder {
            Request::builder()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, format!("bearer {}", self.token))
        }

        fn get(&self, uri: &str) -> Request<Body> {
            self.authed(Method::GET, uri).body(Body::empty()).unwrap()
        }

        fn post_json<T: serde::Serialize>(&self, uri: &str, body: &T) -> Request<Body> {
            self.authed(Method::POST, uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap()
        }

        fn upload(&self, uri: &str, data: &[u8]) -> Request<Body> {
            let boundary = "charmtestboundary";
            let mut body = Vec::new();
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"data\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
            self.authed(Method::POST, uri)
                .header(
                    CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let h = Harness::new().await;
        let request = Request::builder()
            .uri("/v1/seq/kv")
            .body(Body::empty())
            .unwrap();
        let (status, body) = h.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let err: ErrorMessage = serde_json::from_slice(&body).unwrap();
        assert!(!err.error.is_empty());

        let request = Request::builder()
            .uri("/v1/seq/kv")
            .header(AUTHORIZATION, "bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        assert_eq!(h.send(request).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_routes_are_open() {
        let h = Harness::new().await;
        for uri in ["/_status/version", "/_status/readiness"] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            assert_eq!(h.send(request).await.0, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_bio_lifecycle() {
        let h = Harness::new().await;

        let (status, body) = h
            .send(h.post_json("/v1/bio", &serde_json::json!({"name": "ada"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        let me: User = serde_json::from_slice(&body).unwrap();
        assert_eq!(me.name.as_deref(), Some("ada"));
        assert_eq!(me.public_key.unwrap().key, h.key.to_authorized());

        let (status, body) = h.send(h.get("/v1/bio/ADA")).await;
        assert_eq!(status, StatusCode::OK);
        let found: User = serde_json::from_slice(&body).unwrap();
        assert_eq!(found.charm_id, me.charm_id);

        let (status, _) = h.send(h.get(&format!("/v1/id/{}", me.charm_id))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = h.send(h.get("/v1/id/nobody")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = h
            .send(h.post_json("/v1/bio", &serde_json::json!({"name": "no spaces"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_name_taken_is_conflict() {
        let h = Harness::new().await;
        let other = AuthorizedKey::from(&SecretKey::generate().public());
        let other = h.state.database().user_for_key(&other, true).await.unwrap();
        h.state
            .database()
            .set_user_name(&other.charm_id, "grace")
            .await
            .unwrap();

        let (status, _) = h
            .send(h.post_json("/v1/bio", &serde_json::json!({"name": "Grace"})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_seq_endpoints() {
        let h = Harness::new().await;
        let (_, body) = h.send(h.get("/v1/seq/kv")).await;
        let seq: SeqResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(seq.seq, 1);

        let request = h.authed(Method::POST, "/v1/seq/kv").body(Body::empty()).unwrap();
        let (status, body) = h.send(request).await;
        assert_eq!(status, StatusCode::OK);
        let seq: SeqResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(seq.seq, 2);
    }

    #[tokio::test]
    async fn test_encrypt_key_upload() {
        let h = Harness::new().await;
        let upload = EncryptKeyUpload {
            public_key: h.key.to_authorized(),
            global_id: "ring-1".to_string(),
            encrypted_key: "c2VhbGVk".to_string(),
            created_at: None,
        };
        let (status, _) = h.send(h.post_json("/v1/encrypt-key", &upload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.state.database().encrypt_keys_for(&h.key).await.unwrap().len(), 1);

        let stranger = AuthorizedKey::from(&SecretKey::generate().public());
        let upload = EncryptKeyUpload {
            public_key: stranger.to_authorized(),
            ..upload
        };
        let (status, _) = h.send(h.post_json("/v1/encrypt-key", &upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_encrypt_key() {
        let h = Harness::new().await;
        let upload = EncryptKeyUpload {
            public_key: h.key.to_authorized(),
            global_id: "big".to_string(),
            encrypted_key: "A".repeat(ServiceSettings::default().max_encrypt_key_size + 1),
            created_at: None,
        };
        let (status, _) = h.send(h.post_json("/v1/encrypt-key", &upload)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_fs_round_trip() {
        let h = Harness::new().await;

        let (status, _) = h.send(h.upload("/v1/fs/kv/notes/2", b"backup")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = h.send(h.get("/v1/fs/kv/notes/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"backup");

        let (status, body) = h.send(h.get("/v1/fs/kv/notes")).await;
        assert_eq!(status, StatusCode::OK);
        let listing: Vec<FileInfo> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "2");
        assert_eq!(listing[0].size, 6);

        let request = h
            .authed(Method::DELETE, "/v1/fs/kv")
            .body(Body::empty())
            .unwrap();
        assert_eq!(h.send(request).await.0, StatusCode::OK);
        assert_eq!(
            h.send(h.get("/v1/fs/kv/notes/2")).await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let h = Harness::new().await;
        let (status, _) = h.send(h.get("/v1/fs/../../db/charm.sqlite")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_news_pages() {
        let h = Harness::new().await;
        for i in 0..12 {
            h.state
                .database()
                .post_news(&format!("update {}", i), "body", &["server".to_string()])
                .await
                .unwrap();
        }

        let (status, body) = h.send(h.get("/v1/news?tags=server&page=2")).await;
        assert_eq!(status, StatusCode::OK);
        let page: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.len(), 2);

        assert_eq!(h.send(h.get("/v1/news/9999")).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let h = Harness::new().await;
        assert_eq!(h.send(h.get("/v2/nothing")).await.0, StatusCode::NOT_FOUND);
    }
}
