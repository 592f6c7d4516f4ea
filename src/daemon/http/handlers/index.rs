//! Ingestion handlers: add_vectors, trigger_update

use axum::extract::{Request as HttpRequest, State};

use super::AppState;
use crate::daemon::http::types::*;
use crate::daemon::protocol::{Request, Response as RpcResponse, UpdateStatus};
use crate::rpc::ResponseError;

/// Queue vectors for the next rebuild
pub async fn add_vectors(
    State(state): State<AppState>,
    Payload(encoding, request): Payload<AddVectorsRequest>,
) -> Result<Encoded<UpdateStatus>, ApiError> {
    state.handler.metrics().http_requests_total.inc();

    let response = state
        .handler
        .handle(Request::AddVectors {
            vectors: request.vectors,
        })
        .await;
    into_update(encoding, response)
}

/// Start a background rebuild; the body, if any, is ignored, so the reply
/// encoding comes from `Accept`
pub async fn trigger_update(
    State(state): State<AppState>,
    request: HttpRequest,
) -> Result<Encoded<UpdateStatus>, ApiError> {
    state.handler.metrics().http_requests_total.inc();

    let encoding = Encoding::for_response(request.headers());
    let response = state.handler.handle(Request::TriggerUpdate).await;
    into_update(encoding, response)
}

fn into_update(
    encoding: Encoding,
    response: Result<RpcResponse, ResponseError>,
) -> Result<Encoded<UpdateStatus>, ApiError> {
    match response {
        Ok(RpcResponse::Update(status)) => Ok(Encoded(encoding, status)),
        Ok(_) => Err(ApiError::from_response_error(
            encoding,
            ResponseError::internal("Unexpected response type"),
        )),
        Err(e) => Err(ApiError::from_response_error(encoding, e)),
    }
}
