//! RPC Connection
//!
//! One duplex byte stream, one receive loop, many concurrent callers.
//! Outgoing frames share a mutex-guarded writer so frames from different
//! callers never interleave. Incoming requests are handed to a
//! [`Dispatch`] implementation, each on its own task, and answered with
//! exactly one response frame.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::codec::{FrameCodec, Message};
use super::correlator::CallCorrelator;
use super::error::{ResponseError, RpcError};

const READ_CHUNK: usize = 8 * 1024;

/// Serving side of a connection: turns method calls into results
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Handle one request. The returned value (or error) becomes the response frame.
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, ResponseError>;

    /// Handle a fire-and-forget notification
    async fn notify(&self, method: &str, _params: Vec<Value>) {
        debug!("Ignoring notification: {}", method);
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    peer: String,
    codec: FrameCodec,
    writer: Mutex<BoxedWriter>,
    correlator: CallCorrelator,
    closed: watch::Sender<bool>,
}

impl Shared {
    async fn send(&self, message: &Message) -> Result<(), RpcError> {
        if *self.closed.borrow() {
            return Err(RpcError::ConnectionClosed);
        }
        let frame = self.codec.encode(message)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send the reply for `id`, downgrading to an error reply if the result can't be framed
    async fn reply(&self, id: u64, outcome: Result<Value, ResponseError>) {
        let response = Message::response(id, outcome);
        let result = match self.send(&response).await {
            Err(RpcError::Codec(e)) => {
                warn!("Response to call {} could not be encoded: {}", id, e);
                let fallback = Message::response(
                    id,
                    Err(ResponseError::internal(format!("Response could not be encoded: {}", e))),
                );
                self.send(&fallback).await
            }
            other => other,
        };
        if let Err(e) = result {
            debug!("Failed to reply to call {} on {}: {}", id, self.peer, e);
        }
    }

    async fn shutdown(&self) {
        self.closed.send_replace(true);
        let failed = self.correlator.fail_all();
        if failed > 0 {
            debug!("Failed {} pending calls on {}", failed, self.peer);
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// A multiplexed RPC connection over one byte stream
pub struct RpcConnection {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl RpcConnection {
    /// Take ownership of `stream` and start the receive loop.
    ///
    /// With a `dispatcher` the connection also serves inbound requests;
    /// without one, inbound requests are answered with `MethodNotFound`.
    pub fn spawn<S>(
        stream: S,
        peer: impl Into<String>,
        dispatcher: Option<Arc<dyn Dispatch>>,
        max_frame_bytes: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            peer: peer.into(),
            codec: FrameCodec::new(max_frame_bytes),
            writer: Mutex::new(Box::new(writer)),
            correlator: CallCorrelator::new(),
            closed,
        });

        let receiver = tokio::spawn(receive_loop(shared.clone(), reader, dispatcher));
        Self { shared, receiver }
    }

    /// Call `method` and wait for its response
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let correlator = &self.shared.correlator;
        let id = correlator.next_id();
        // Registered before the frame is written so the response can't arrive first
        let pending = correlator.register(id, method)?;

        debug!("Calling {} (id {}) on {}", method, id, self.shared.peer);
        if let Err(e) = self.shared.send(&Message::request(id, method, params)).await {
            correlator.forget(id);
            return Err(e);
        }

        pending.wait().await
    }

    /// Send a notification; no response is expected
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        self.shared.send(&Message::notification(method, params)).await
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Number of calls awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.shared.correlator.pending_len()
    }

    /// Wait until the receive loop has stopped
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the stream and fail every pending call
    pub async fn close(&self) {
        self.receiver.abort();
        self.shared.shutdown().await;
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.receiver.abort();
        self.shared.closed.send_replace(true);
        self.shared.correlator.fail_all();
    }
}

async fn receive_loop<R>(shared: Arc<Shared>, mut reader: R, dispatcher: Option<Arc<dyn Dispatch>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        match shared.codec.decode(&mut buf) {
            Ok(Some(message)) => {
                handle_incoming(&shared, &dispatcher, message);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Protocol error on {}: {}; closing connection", shared.peer, e);
                break;
            }
        }

        if buf.capacity() - buf.len() < READ_CHUNK {
            buf.reserve(READ_CHUNK);
        }
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                if buf.is_empty() {
                    debug!("{} disconnected", shared.peer);
                } else {
                    warn!("{} disconnected mid-frame ({} bytes unread)", shared.peer, buf.len());
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Read error on {}: {}", shared.peer, e);
                break;
            }
        }
    }

    shared.shutdown().await;
}

fn handle_incoming(shared: &Arc<Shared>, dispatcher: &Option<Arc<dyn Dispatch>>, message: Message) {
    match message {
        Message::Response { id, error, result } => match error {
            None => {
                shared.correlator.resolve(id, result);
            }
            Some(e) => {
                shared.correlator.fail(id, RpcError::Remote(e));
            }
        },
        Message::Request { id, method, params } => {
            debug!("Request {} (id {}) from {}", method, id, shared.peer);
            let shared = shared.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let outcome = match dispatcher {
                    Some(dispatcher) => run_handler(dispatcher, method, params).await,
                    None => Err(ResponseError::method_not_found(&method)),
                };
                shared.reply(id, outcome).await;
            });
        }
        Message::Notification { method, params } => {
            debug!("Notification {} from {}", method, shared.peer);
            if let Some(dispatcher) = dispatcher.clone() {
                tokio::spawn(async move {
                    dispatcher.notify(&method, params).await;
                });
            }
        }
    }
}

/// Run a handler on its own task so a panic still produces a reply
async fn run_handler(
    dispatcher: Arc<dyn Dispatch>,
    method: String,
    params: Vec<Value>,
) -> Result<Value, ResponseError> {
    let name = method.clone();
    match tokio::spawn(async move { dispatcher.dispatch(&method, params).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Handler for {} failed: {}", name, e);
            Err(ResponseError::internal(format!("Handler for {} failed", name)))
        }
    }
}
