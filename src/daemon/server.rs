//! RPC Server
//!
//! TCP server speaking the framed MessagePack RPC protocol. Every accepted
//! stream becomes an [`RpcConnection`] served by the shared [`RequestHandler`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::rpc::{Dispatch, RpcConnection};

use super::handler::RequestHandler;

/// RPC server listening on a TCP socket
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    max_frame_bytes: usize,
}

impl RpcServer {
    /// Bind the listening socket
    pub async fn bind(addr: &str, handler: Arc<RequestHandler>, max_frame_bytes: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind RPC server to {}", addr))?;

        Ok(Self {
            listener,
            handler,
            max_frame_bytes,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("RPC server listening on: {}", self.local_addr()?);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("New client connection from {}", addr);
                            self.serve(stream, addr, shutdown.resubscribe());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn serve(&self, stream: TcpStream, addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let metrics = self.handler.metrics().clone();
        let dispatcher: Arc<dyn Dispatch> = self.handler.clone();
        let connection = RpcConnection::spawn(stream, addr.to_string(), Some(dispatcher), self.max_frame_bytes);

        metrics.connections_total.inc();
        metrics.active_connections.inc();

        tokio::spawn(async move {
            tokio::select! {
                _ = connection.closed() => {}
                _ = shutdown.recv() => {
                    connection.close().await;
                }
            }
            metrics.active_connections.dec();
            debug!("Connection from {} finished", addr);
        });
    }
}
