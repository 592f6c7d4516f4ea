//! HTTP API Server
//!
//! Axum-based HTTP server for the vindex REST API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::Method;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::HttpConfig;
use crate::daemon::handler::RequestHandler;

use super::handlers::AppState;
use super::routes::create_router;

/// HTTP API server
pub struct HttpServer {
    config: HttpConfig,
    handler: Arc<RequestHandler>,
    default_k: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: HttpConfig, handler: Arc<RequestHandler>, default_k: usize) -> Self {
        Self {
            config,
            handler,
            default_k,
        }
    }

    /// Router with middleware applied
    pub fn router(&self) -> Router {
        let app_state = AppState {
            handler: self.handler.clone(),
            default_k: self.default_k,
        };

        let mut app = create_router(app_state);

        if self.config.cors_enabled {
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .allow_origin(Any);
            app = app.layer(cors);
        }

        app.layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .context("Invalid HTTP listen address")?;

        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("HTTP API server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await
            .context("HTTP server error")?;

        Ok(())
    }

    /// Bind and run the HTTP server
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}
