//! HTTP endpoints for the relay.
//!
//! `/` serves the WebSocket and NIP-11 document; `/health` and `/metrics`
//! serve operators.

pub mod health;
pub mod info;
mod metrics;

use crate::protocol::relay_handler;
use crate::server::Relay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;
pub use info::RelayInformation;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let mut router = Router::new()
        .route("/", get(relay_handler))
        .route("/health", get(health::health_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteStorage;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use std::net::SocketAddr;
    use tower::util::ServiceExt;

    async fn test_relay(config: Config) -> Arc<Relay> {
        let storage = SqliteStorage::in_memory().await.unwrap();
        Arc::new(Relay::new(config, storage))
    }

    fn app(relay: Arc<Relay>) -> Router {
        build_router(relay).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = app(test_relay(Config::default()).await);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let app = app(test_relay(Config::default()).await);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("# TYPE nostr_relay_connections_active gauge"));
        assert!(body.contains("nostr_relay_storage_events 0"));
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = app(test_relay(config).await);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_serves_nip11_document() {
        let app = app(test_relay(Config::default()).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::ACCEPT, "application/nostr+json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/nostr+json"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["name"], "tessera");
        assert_eq!(json["limitation"]["max_subscriptions"], 20);
    }

    #[tokio::test]
    async fn root_without_upgrade_or_accept_is_plain_text() {
        let app = app(test_relay(Config::default()).await);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("Nostr client"));
    }
}
