//! Framed MessagePack RPC
//!
//! - [`codec`] frames messages as a big-endian length plus a MessagePack array
//! - [`correlator`] matches responses to waiting calls by id
//! - [`connection`] runs the receive loop and multiplexes calls over one stream

pub mod codec;
pub mod connection;
pub mod correlator;
pub mod error;

pub use codec::{FrameCodec, Message, MessageType, MAX_FRAME_SIZE};
pub use connection::{Dispatch, RpcConnection};
pub use correlator::{CallCorrelator, PendingResponse};
pub use error::{CodecError, ErrorCode, ResponseError, RpcError};
