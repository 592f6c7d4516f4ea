//! RPC error taxonomy

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error codes carried in the error field of a response frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    MethodNotFound,
    InvalidParams,
    IndexNotReady,
    RebuildFailed,
    SearchFailed,
    QueueFull,
    InternalError,
}

/// Method-level failure returned to the caller instead of a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Unknown method: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Structured wire form: `{code, message}`
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "code": self.code,
            "message": self.message,
        })
    }

    /// Parse the error field of a response frame.
    ///
    /// Accepts nil (no error), a bare string, or a `{code, message}` map.
    /// Unrecognized codes degrade to `InternalError` so the message survives.
    pub fn from_wire(value: Value) -> Result<Option<Self>, CodecError> {
        match value {
            Value::Null => Ok(None),
            Value::String(message) => Ok(Some(Self::internal(message))),
            Value::Object(mut map) => {
                let message = match map.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let code = map
                    .remove("code")
                    .and_then(|c| serde_json::from_value(c).ok())
                    .unwrap_or(ErrorCode::InternalError);
                Ok(Some(Self { code, message }))
            }
            other => Err(CodecError::Protocol(format!(
                "error field must be nil, string or map, got {}",
                other
            ))),
        }
    }
}

/// Failures while framing or parsing messages
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not enough bytes buffered yet; keep reading
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

impl CodecError {
    /// Whether more input could still complete the frame
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Failures seen by a caller of [`super::RpcConnection::call`]
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(#[from] ResponseError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl RpcError {
    /// The remote error code, if the peer answered with an error
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote(e) => Some(e.code),
            _ => None,
        }
    }
}
