//! Daemon Lifecycle Management
//!
//! Handles daemon startup, the periodic rebuild timer, and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;

use super::handler::RequestHandler;
use super::http::HttpServer;
use super::index_manager::{IndexManager, TriggerOutcome};
use super::metrics::DaemonMetrics;
use super::server::RpcServer;

/// How often memory usage is sampled into the metrics
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

/// Grace period for servers to stop after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Daemon instance managing all components
pub struct Daemon {
    config: Config,
    index_manager: Arc<IndexManager>,
    handler: Arc<RequestHandler>,
    rpc_addr: SocketAddr,
    http_addr: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Daemon {
    /// Build every component, bind listeners and start background tasks
    pub async fn start(config: Config) -> Result<Self> {
        info!("Starting vindex daemon");
        config.validate()?;

        let metrics = DaemonMetrics::shared();
        let index_manager =
            IndexManager::new(&config, metrics.clone()).context("Failed to create index manager")?;
        let handler = Arc::new(RequestHandler::new(index_manager.clone()));

        let (shutdown_tx, _) = broadcast::channel(16);
        let mut tasks = Vec::new();

        let rpc_server = RpcServer::bind(
            &config.rpc.listen_addr,
            handler.clone(),
            config.rpc.max_frame_bytes,
        )
        .await?;
        let rpc_addr = rpc_server.local_addr()?;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push((
            "RPC server",
            tokio::spawn(async move {
                match rpc_server.run(shutdown_rx).await {
                    Ok(()) => info!("RPC server shut down cleanly"),
                    Err(e) => error!("RPC server failed: {}", e),
                }
            }),
        ));

        let http_addr = if config.http.enabled {
            let http_server = HttpServer::new(config.http.clone(), handler.clone(), config.index.default_k);
            let listener = http_server.bind().await?;
            let addr = listener.local_addr()?;
            let shutdown_rx = shutdown_tx.subscribe();
            tasks.push((
                "HTTP server",
                tokio::spawn(async move {
                    match http_server.serve(listener, shutdown_rx).await {
                        Ok(()) => info!("HTTP server shut down cleanly"),
                        Err(e) => error!("HTTP server failed: {}", e),
                    }
                }),
            ));
            Some(addr)
        } else {
            None
        };

        tasks.push((
            "memory sampler",
            spawn_memory_sampler(metrics, shutdown_tx.subscribe()),
        ));

        if let Some(interval) = config.rebuild.interval() {
            info!("Rebuilding every {:?}", interval);
            tasks.push((
                "rebuild scheduler",
                spawn_rebuild_scheduler(index_manager.clone(), interval, shutdown_tx.subscribe()),
            ));
        }

        if config.rebuild.on_startup {
            info!("Triggering initial index build");
            index_manager.trigger_rebuild();
        }

        info!("Daemon initialized");
        info!("Index: {} dimensions, {} builder", config.index.dimensions, index_manager.stats().builder);

        Ok(Self {
            config,
            index_manager,
            handler,
            rpc_addr,
            http_addr,
            shutdown_tx,
            tasks,
        })
    }

    /// Run until Ctrl+C, SIGTERM or [`Daemon::shutdown_handle`] fires
    pub async fn run(self) -> Result<()> {
        info!("Daemon running");
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = Self::wait_for_sigterm() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = Self::wait_for_shutdown(shutdown_rx) => {
                info!("Shutdown requested");
            }
        }

        self.shutdown().await
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down daemon");
        let _ = self.shutdown_tx.send(());

        for (name, task) in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("{} did not shut down within {:?}, aborting", name, SHUTDOWN_GRACE);
                abort.abort();
            }
        }

        info!("Daemon shutdown complete");
        Ok(())
    }

    /// Sender that stops a running daemon when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address the RPC server is bound to
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// Address the HTTP server is bound to, when enabled
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Get the index manager
    pub fn index_manager(&self) -> Arc<IndexManager> {
        self.index_manager.clone()
    }

    /// Get the request handler
    pub fn request_handler(&self) -> Arc<RequestHandler> {
        self.handler.clone()
    }

    /// Wait for SIGTERM signal
    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}. Falling back to pending future.", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        std::future::pending::<()>().await
    }

    async fn wait_for_shutdown(mut rx: broadcast::Receiver<()>) {
        let _ = rx.recv().await;
    }
}

/// Periodically trigger a rebuild. Ticks that land on a running rebuild are
/// coalesced by the manager.
pub fn spawn_rebuild_scheduler(
    manager: Arc<IndexManager>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match manager.trigger_rebuild() {
                        TriggerOutcome::Started => info!("Scheduled index update started"),
                        TriggerOutcome::Coalesced => debug!("Scheduled index update skipped, one is running"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

fn spawn_memory_sampler(metrics: Arc<DaemonMetrics>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => metrics.update_memory_usage(),
                _ = shutdown.recv() => break,
            }
        }
    })
}
