//! System handlers: health, metrics, stats

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::AppState;
use crate::daemon::http::types::*;
use crate::daemon::protocol::{Request, Response as RpcResponse};

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let manager = state.handler.index_manager();
    Json(HealthResponse {
        healthy: manager.is_ready(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generation: manager.generation(),
    })
}

/// Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.handler.metrics().update_memory_usage();
    let body = state.handler.metrics().to_prometheus();
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Stats endpoint
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.handler.handle(Request::Stats).await {
        Ok(RpcResponse::Stats(stats)) => (StatusCode::OK, Json(stats)).into_response(),
        Ok(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal_error("Unexpected response type")),
        )
            .into_response(),
        Err(e) => ApiError::from_response_error(Encoding::Json, e).into_response(),
    }
}
