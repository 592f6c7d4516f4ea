//! HTTP API Route Definitions

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router with all routes
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/search", post(handlers::search))
        .route("/add_vectors", post(handlers::add_vectors))
        .route("/trigger_update", post(handlers::trigger_update))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::RebuildConfig;
    use crate::daemon::handler::RequestHandler;
    use crate::daemon::http::types::MSGPACK_CONTENT_TYPE;
    use crate::daemon::index_manager::IndexManager;
    use crate::daemon::metrics::DaemonMetrics;
    use crate::index::FlatIndexBuilder;
    use crate::types::{SearchResults, VectorBatch};

    fn test_state(seed: Option<VectorBatch>) -> AppState {
        let manager = IndexManager::with_builder(
            2,
            Arc::new(FlatIndexBuilder),
            &RebuildConfig::default(),
            seed,
            DaemonMetrics::shared(),
        );
        AppState {
            handler: Arc::new(RequestHandler::new(manager)),
            default_k: 2,
        }
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn built_state() -> AppState {
        let seed = VectorBatch::from_rows(2, vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![4.0, 4.0]]).unwrap();
        let state = test_state(Some(seed));
        state.handler.index_manager().rebuild_now().await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_search_before_build_is_unavailable() {
        let app = create_router(test_state(None));
        let response = app
            .oneshot(json_post("/search", json!({"queries": [[1.0, 1.0]], "k": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["code"], "INDEX_NOT_READY");
    }

    #[tokio::test]
    async fn test_json_search_returns_per_query_results() {
        let app = create_router(built_state().await);
        let response = app
            .oneshot(json_post("/search", json!({"queries": [[0.9, 0.9], [4.0, 4.0]]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        // k falls back to the configured default of 2
        assert_eq!(results[0]["indices"], json!([1, 0]));
        assert_eq!(results[1]["indices"][0], 2);
    }

    #[tokio::test]
    async fn test_msgpack_search_returns_columnar_results() {
        let app = create_router(built_state().await);
        let body = rmp_serde::to_vec_named(&json!({"queries": [[0.1, 0.1]], "k": 1})).unwrap();
        let request = Request::post("/search")
            .header(header::CONTENT_TYPE, MSGPACK_CONTENT_TYPE)
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            MSGPACK_CONTENT_TYPE
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let results: SearchResults = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(results.indices, vec![vec![0]]);
    }

    #[tokio::test]
    async fn test_oversized_k_is_bad_request() {
        let app = create_router(built_state().await);
        let response = app
            .oneshot(json_post("/search", json!({"queries": [[0.0, 0.0]], "k": 1u64 << 40})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = create_router(test_state(None));
        let request = Request::post("/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_add_vectors_and_trigger_update() {
        let state = test_state(None);
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_post("/add_vectors", json!({"vectors": [[1.0, 2.0]]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "queued");

        let response = app
            .clone()
            .oneshot(json_post("/add_vectors", json!({})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "no_change");

        let response = app
            .clone()
            .oneshot(json_post("/add_vectors", json!({"vectors": [[1.0, 2.0, 3.0]]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(Request::post("/trigger_update").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "processing");

        state.handler.index_manager().wait_for_generation(1).await;
        assert_eq!(state.handler.index_manager().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_update_replies_in_accepted_encoding() {
        let app = create_router(test_state(None));
        let request = Request::post("/trigger_update")
            .header(header::ACCEPT, MSGPACK_CONTENT_TYPE)
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            MSGPACK_CONTENT_TYPE
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: crate::daemon::protocol::UpdateStatus = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(status.status, crate::daemon::protocol::UpdateState::Processing);
    }

    #[tokio::test]
    async fn test_health_stats_and_metrics() {
        let app = create_router(built_state().await);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = body_json(response).await;
        assert_eq!(health["healthy"], true);
        assert_eq!(health["generation"], 1);

        let response = app
            .clone()
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["indexed_vectors"], 3);
        assert_eq!(stats["state"], "active");

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("vindex_index_generation 1"));
    }
}
