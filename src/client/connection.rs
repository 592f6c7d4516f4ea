//! Client Connection
//!
//! Handles the TCP connection to the daemon's RPC server.

use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::daemon::protocol::Request;
use crate::rpc::{RpcConnection, RpcError, MAX_FRAME_SIZE};

use super::ClientError;

/// Client connection to the daemon
///
/// Calls may be issued concurrently from many tasks; each one is
/// correlated to its own response.
pub struct DaemonClient {
    connection: RpcConnection,
}

impl DaemonClient {
    /// Connect to the daemon
    pub async fn connect<A: ToSocketAddrs + std::fmt::Display>(addr: A) -> Result<Self, ClientError> {
        Self::connect_with_limit(addr, MAX_FRAME_SIZE).await
    }

    /// Connect with a custom frame size limit
    pub async fn connect_with_limit<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        max_frame_bytes: usize,
    ) -> Result<Self, ClientError> {
        debug!("Connecting to daemon at: {}", addr);
        let peer = addr.to_string();

        let stream = TcpStream::connect(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                ClientError::DaemonNotRunning(peer.clone())
            } else {
                ClientError::ConnectionFailed(e.to_string())
            }
        })?;
        let _ = stream.set_nodelay(true);

        debug!("Connected to daemon");
        Ok(Self {
            connection: RpcConnection::spawn(stream, peer, None, max_frame_bytes),
        })
    }

    /// Send a request and wait for its result value
    pub async fn send(&self, request: Request) -> Result<Value, ClientError> {
        let method = request.method();
        self.connection
            .call(method, request.into_params())
            .await
            .map_err(ClientError::from)
    }

    /// Send a request without waiting for a reply
    pub async fn send_notification(&self, request: Request) -> Result<(), ClientError> {
        let method = request.method();
        self.connection
            .notify(method, request.into_params())
            .await
            .map_err(ClientError::from)
    }

    /// The underlying RPC connection
    pub fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    /// Close the connection, failing any calls still waiting
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(e) => ClientError::Daemon(e),
            RpcError::ConnectionClosed => ClientError::ConnectionClosed,
            other => ClientError::RequestFailed(other.to_string()),
        }
    }
}
