//! HTTP API Request/Response Types
//!
//! Bodies are JSON by default. A request sent with
//! `Content-Type: application/x-msgpack` is decoded as MessagePack. Replies
//! follow `Accept` when it names JSON or MessagePack, otherwise they use the
//! request's body encoding.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::rpc::{ErrorCode, ResponseError};
use crate::types::QueryResult;

/// MessagePack media type
pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

/// Wire encoding of an HTTP body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    MsgPack,
}

fn parse_media(media: &str) -> Option<Encoding> {
    let media = media.split(';').next().unwrap_or("").trim();
    if media.eq_ignore_ascii_case(MSGPACK_CONTENT_TYPE) || media.eq_ignore_ascii_case("application/msgpack") {
        Some(Encoding::MsgPack)
    } else if media.eq_ignore_ascii_case("application/json") {
        Some(Encoding::Json)
    } else {
        None
    }
}

impl Encoding {
    /// Encoding of the request body
    pub fn from_content_type(headers: &HeaderMap) -> Self {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_media)
            .unwrap_or(Self::Json)
    }

    /// Encoding of the reply: the first JSON or MessagePack entry in
    /// `Accept`, else the request body encoding
    pub fn for_response(headers: &HeaderMap) -> Self {
        headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .find_map(parse_media)
            .unwrap_or_else(|| Self::from_content_type(headers))
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MsgPack => MSGPACK_CONTENT_TYPE,
        }
    }

    /// Decode a request body
    pub fn decode<T: DeserializeOwned>(self, body: &[u8]) -> Result<T, String> {
        let decoded = match self {
            Self::Json => serde_json::from_slice(body).map_err(|e| e.to_string()),
            Self::MsgPack => rmp_serde::from_slice(body).map_err(|e| e.to_string()),
        };
        decoded.map_err(|e| format!("Failed to decode request body: {}", e))
    }

    /// Encode a response body with the given status
    pub fn respond<T: Serialize>(self, status: StatusCode, body: &T) -> Response {
        let encoded = match self {
            Self::Json => serde_json::to_vec(body).map_err(|e| e.to_string()),
            Self::MsgPack => rmp_serde::to_vec_named(body).map_err(|e| e.to_string()),
        };

        match encoded {
            Ok(bytes) => (
                status,
                [(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type()))],
                bytes,
            )
                .into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode response: {}", e),
            )
                .into_response(),
        }
    }
}

/// Request body extractor; carries the encoding to reply in
pub struct Payload<T>(pub Encoding, pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body_encoding = Encoding::from_content_type(req.headers());
        let encoding = Encoding::for_response(req.headers());
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(encoding, e.to_string()))?;
        let value = body_encoding
            .decode(&body)
            .map_err(|e| ApiError::bad_request(encoding, e))?;
        Ok(Payload(encoding, value))
    }
}

/// A successful body in the negotiated encoding
pub struct Encoded<T>(pub Encoding, pub T);

impl<T: Serialize> IntoResponse for Encoded<T> {
    fn into_response(self) -> Response {
        self.0.respond(StatusCode::OK, &self.1)
    }
}

/// Search request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query vectors
    pub queries: Vec<Vec<f32>>,
    /// Neighbors per query (default: `index.default_k`)
    #[serde(default)]
    pub k: Option<usize>,
}

/// JSON search response: one entry per query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<QueryResult>,
}

/// Add vectors request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddVectorsRequest {
    /// Vectors to queue; missing means none
    #[serde(default)]
    pub vectors: Vec<Vec<f32>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Whether an index is installed and serving
    pub healthy: bool,
    /// Service version
    pub version: String,
    /// Active index generation
    pub generation: u64,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

/// An error response in the negotiated encoding
#[derive(Debug)]
pub struct ApiError {
    encoding: Encoding,
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(encoding: Encoding, status: StatusCode, body: ErrorResponse) -> Self {
        Self {
            encoding,
            status,
            body,
        }
    }

    pub fn bad_request(encoding: Encoding, message: impl Into<String>) -> Self {
        Self::new(encoding, StatusCode::BAD_REQUEST, ErrorResponse::bad_request(message))
    }

    /// Map a method-level error onto an HTTP status
    pub fn from_response_error(encoding: Encoding, err: ResponseError) -> Self {
        let (status, code) = match err.code {
            ErrorCode::IndexNotReady => (StatusCode::SERVICE_UNAVAILABLE, "INDEX_NOT_READY"),
            ErrorCode::InvalidParams => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ErrorCode::MethodNotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ErrorCode::QueueFull => (StatusCode::TOO_MANY_REQUESTS, "QUEUE_FULL"),
            ErrorCode::SearchFailed => (StatusCode::INTERNAL_SERVER_ERROR, "SEARCH_FAILED"),
            ErrorCode::RebuildFailed => (StatusCode::INTERNAL_SERVER_ERROR, "REBUILD_FAILED"),
            ErrorCode::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        Self::new(encoding, status, ErrorResponse::new(code, err.message))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.encoding.respond(self.status, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_from_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(Encoding::from_content_type(&headers), Encoding::Json);

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-msgpack"));
        assert_eq!(Encoding::from_content_type(&headers), Encoding::MsgPack);

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert_eq!(Encoding::from_content_type(&headers), Encoding::Json);
    }

    #[test]
    fn test_response_encoding_prefers_accept() {
        let mut headers = HeaderMap::new();
        assert_eq!(Encoding::for_response(&headers), Encoding::Json);

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-msgpack"));
        assert_eq!(Encoding::for_response(&headers), Encoding::MsgPack);

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert_eq!(Encoding::for_response(&headers), Encoding::Json);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html, application/x-msgpack;q=0.9"),
        );
        assert_eq!(Encoding::for_response(&headers), Encoding::MsgPack);

        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        assert_eq!(Encoding::for_response(&headers), Encoding::Json);
    }

    #[test]
    fn test_msgpack_search_request_decodes_without_k() {
        #[derive(Serialize)]
        struct Body {
            queries: Vec<Vec<f32>>,
        }
        let bytes = rmp_serde::to_vec_named(&Body {
            queries: vec![vec![1.0, 2.0]],
        })
        .unwrap();

        let request: SearchRequest = Encoding::MsgPack.decode(&bytes).unwrap();
        assert_eq!(request.queries, vec![vec![1.0, 2.0]]);
        assert_eq!(request.k, None);
    }

    #[test]
    fn test_error_status_mapping() {
        let not_ready = ApiError::from_response_error(
            Encoding::Json,
            ResponseError::new(ErrorCode::IndexNotReady, "later"),
        );
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bad = ApiError::from_response_error(Encoding::Json, ResponseError::invalid_params("no"));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }
}
