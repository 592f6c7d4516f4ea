//! Search handler

use axum::{extract::State, response::IntoResponse, response::Response};

use super::AppState;
use crate::daemon::http::types::*;
use crate::daemon::metrics::Timer;
use crate::daemon::protocol::{Request, Response as RpcResponse};
use crate::rpc::ResponseError;

/// k-nearest-neighbor search
///
/// JSON callers get `{"results": [{distances, indices}, ...]}`; MessagePack
/// callers get the columnar `{distances, indices}` matrices.
pub async fn search(
    State(state): State<AppState>,
    Payload(encoding, request): Payload<SearchRequest>,
) -> Result<Response, ApiError> {
    let timer = Timer::start();
    let metrics = state.handler.metrics().clone();
    metrics.http_requests_total.inc();

    let k = request.k.unwrap_or(state.default_k);
    let result = state
        .handler
        .handle(Request::Search {
            queries: request.queries,
            k,
        })
        .await;
    timer.record(&metrics.http_request_latency);

    match result {
        Ok(RpcResponse::SearchResults(results)) => Ok(match encoding {
            Encoding::Json => Encoded(
                encoding,
                SearchResponse {
                    results: results.into_rows(),
                },
            )
            .into_response(),
            Encoding::MsgPack => Encoded(encoding, results).into_response(),
        }),
        Ok(_) => Err(ApiError::from_response_error(
            encoding,
            ResponseError::internal("Unexpected response type"),
        )),
        Err(e) => Err(ApiError::from_response_error(encoding, e)),
    }
}
