//! Wire Codec
//!
//! Every message travels as one frame: a 4-byte big-endian length `L`
//! followed by exactly `L` bytes of a MessagePack array.
//!
//! ```text
//! Request:      [0, id, method, params]
//! Response:     [1, id, error, result]
//! Notification: [2, method, params]
//! ```

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{CodecError, ResponseError};

/// Wire format limit (64MB max frame payload)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Size of the length prefix
pub const HEADER_LEN: usize = 4;

/// Message type tag, the first element of every payload array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Notification = 2,
}

impl MessageType {
    /// Number of elements in a payload array of this type
    pub fn arity(self) -> usize {
        match self {
            Self::Request | Self::Response => 4,
            Self::Notification => 3,
        }
    }
}

impl TryFrom<u64> for MessageType {
    type Error = CodecError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Notification),
            other => Err(CodecError::Protocol(format!("unknown message type {}", other))),
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u64,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u64,
        error: Option<ResponseError>,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl Message {
    pub fn request(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Response carrying either a result or an error (never both)
    pub fn response(id: u64, outcome: Result<Value, ResponseError>) -> Self {
        match outcome {
            Ok(result) => Self::Response {
                id,
                error: None,
                result,
            },
            Err(error) => Self::Response {
                id,
                error: Some(error),
                result: Value::Null,
            },
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Self::Request { .. } => MessageType::Request,
            Self::Response { .. } => MessageType::Response,
            Self::Notification { .. } => MessageType::Notification,
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            Self::Request { id, method, params } => {
                json!([MessageType::Request as u8, id, method, params])
            }
            Self::Response { id, error, result } => {
                let error = error.as_ref().map(ResponseError::to_wire).unwrap_or(Value::Null);
                json!([MessageType::Response as u8, id, error, result])
            }
            Self::Notification { method, params } => {
                json!([MessageType::Notification as u8, method, params])
            }
        }
    }

    fn from_wire(value: Value) -> Result<Self, CodecError> {
        let Value::Array(items) = value else {
            return Err(CodecError::Protocol("payload is not an array".to_string()));
        };

        let tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::Protocol("missing message type".to_string()))?;
        let kind = MessageType::try_from(tag)?;
        if items.len() != kind.arity() {
            return Err(CodecError::Protocol(format!(
                "{:?} frame has {} elements, expected {}",
                kind,
                items.len(),
                kind.arity()
            )));
        }

        let mut fields = items.into_iter().skip(1);
        let mut next = || fields.next().unwrap_or(Value::Null);

        match kind {
            MessageType::Request => {
                let id = expect_id(next())?;
                let method = expect_method(next())?;
                let params = expect_params(next())?;
                Ok(Self::Request { id, method, params })
            }
            MessageType::Response => {
                let id = expect_id(next())?;
                let error = ResponseError::from_wire(next())?;
                let result = next();
                Ok(Self::Response { id, error, result })
            }
            MessageType::Notification => {
                let method = expect_method(next())?;
                let params = expect_params(next())?;
                Ok(Self::Notification { method, params })
            }
        }
    }
}

fn expect_id(value: Value) -> Result<u64, CodecError> {
    value
        .as_u64()
        .ok_or_else(|| CodecError::Protocol(format!("message id must be an unsigned integer, got {}", value)))
}

fn expect_method(value: Value) -> Result<String, CodecError> {
    match value {
        Value::String(method) => Ok(method),
        other => Err(CodecError::Protocol(format!("method must be a string, got {}", other))),
    }
}

fn expect_params(value: Value) -> Result<Vec<Value>, CodecError> {
    match value {
        Value::Array(params) => Ok(params),
        other => Err(CodecError::Protocol(format!("params must be an array, got {}", other))),
    }
}

/// Encode a message into a complete frame
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    encode_with_limit(message, MAX_FRAME_SIZE)
}

/// Encode a message, rejecting payloads larger than `max_frame`
pub fn encode_with_limit(message: &Message, max_frame: usize) -> Result<Vec<u8>, CodecError> {
    let payload =
        rmp_serde::to_vec(&message.to_wire()).map_err(|e| CodecError::Encode(e.to_string()))?;
    let limit = max_frame.min(u32::MAX as usize);
    if payload.len() > limit {
        return Err(CodecError::FrameTooLarge {
            len: payload.len(),
            max: limit,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode one frame from the front of `buf`.
///
/// Returns the message and the number of bytes it occupied. A
/// [`CodecError::Truncated`] means the frame is incomplete, not invalid.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), CodecError> {
    decode_with_limit(buf, MAX_FRAME_SIZE)
}

pub fn decode_with_limit(buf: &[u8], max_frame: usize) -> Result<(Message, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }

    let mut len_bytes = [0u8; HEADER_LEN];
    len_bytes.copy_from_slice(&buf[..HEADER_LEN]);
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_frame {
        return Err(CodecError::FrameTooLarge { len, max: max_frame });
    }

    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Err(CodecError::Truncated {
            needed: total,
            available: buf.len(),
        });
    }

    let message = decode_payload(&buf[HEADER_LEN..total])?;
    Ok((message, total))
}

/// Decode a payload (the bytes after the length prefix)
pub fn decode_payload(payload: &[u8]) -> Result<Message, CodecError> {
    let mut cursor = Cursor::new(payload);
    let value = {
        let mut de = rmp_serde::Deserializer::new(&mut cursor);
        Value::deserialize(&mut de).map_err(|e| CodecError::Protocol(e.to_string()))?
    };
    if cursor.position() as usize != payload.len() {
        return Err(CodecError::Protocol(format!(
            "{} trailing bytes after payload",
            payload.len() - cursor.position() as usize
        )));
    }
    Message::from_wire(value)
}

/// Incremental framing over a growable receive buffer
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        encode_with_limit(message, self.max_frame)
    }

    /// Take the next complete message off `buf`, or `None` if more bytes are needed
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        match decode_with_limit(buf, self.max_frame) {
            Ok((message, used)) => {
                buf.advance(used);
                Ok(Some(message))
            }
            Err(CodecError::Truncated { needed, available }) => {
                buf.reserve(needed - available);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::ErrorCode;

    fn raw_frame(payload: &Value) -> Vec<u8> {
        let body = rmp_serde::to_vec(payload).unwrap();
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&body);
        frame
    }

    #[test]
    fn test_request_frame_layout() {
        let msg = Message::request(7, "search", vec![json!([[1.0, 2.0]]), json!(3)]);
        let frame = encode(&msg).unwrap();

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);

        let (decoded, used) = decode(&frame).unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_error_response_is_structured() {
        let msg = Message::response(
            3,
            Err(ResponseError::new(ErrorCode::IndexNotReady, "not built")),
        );
        let frame = encode(&msg).unwrap();
        let (decoded, _) = decode(&frame).unwrap();
        match decoded {
            Message::Response { id, error, result } => {
                assert_eq!(id, 3);
                assert_eq!(error.unwrap().code, ErrorCode::IndexNotReady);
                assert_eq!(result, Value::Null);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_string_error_is_accepted() {
        let frame = raw_frame(&json!([1, 9, "plain failure", null]));
        let (decoded, _) = decode(&frame).unwrap();
        match decoded {
            Message::Response { error: Some(e), .. } => {
                assert_eq!(e.code, ErrorCode::InternalError);
                assert_eq!(e.message, "plain failure");
            }
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let frame = encode(&Message::notification("tick", vec![json!(1)])).unwrap();

        for cut in 0..frame.len() {
            let err = decode(&frame[..cut]).unwrap_err();
            assert!(err.is_truncated(), "cut at {} gave {:?}", cut, err);
        }
        assert!(decode(&frame).is_ok());
    }

    #[test]
    fn test_frame_codec_buffers_across_reads() {
        let codec = FrameCodec::default();
        let first = encode(&Message::request(1, "ping", vec![])).unwrap();
        let second = encode(&Message::request(2, "ping", vec![])).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&first[3..]);
        buf.extend_from_slice(&second[..5]);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Message::Request { id: 1, .. })));
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&second[5..]);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Message::Request { id: 2, .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let frame = raw_frame(&json!([5, 1, "x", []]));
        assert!(matches!(decode(&frame), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_arity_mismatch_is_protocol_error() {
        let frame = raw_frame(&json!([0, 1, "search"]));
        assert!(matches!(decode(&frame), Err(CodecError::Protocol(_))));

        let frame = raw_frame(&json!([2, "tick", [], "extra"]));
        assert!(matches!(decode(&frame), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_non_array_payload_is_protocol_error() {
        let frame = raw_frame(&json!({"type": 0}));
        assert!(matches!(decode(&frame), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_declared_length_with_trailing_bytes_is_rejected() {
        let body = rmp_serde::to_vec(&json!([2, "tick", []])).unwrap();
        let mut frame = ((body.len() + 2) as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&[0xc0, 0xc0]);
        assert!(matches!(decode(&frame), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_oversized_length_is_rejected_before_buffering() {
        let header = 1024u32.to_be_bytes();
        let err = decode_with_limit(&header, 512).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { len: 1024, max: 512 }));

        let big = Message::request(1, "add_vectors", vec![json!(vec![0.5f32; 256])]);
        assert!(matches!(
            encode_with_limit(&big, 64),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }
}
