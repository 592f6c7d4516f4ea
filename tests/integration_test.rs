//! Integration tests for vindex
//!
//! These tests run a real daemon on loopback TCP and drive it through the
//! RPC client.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vindex::{
    client::{ClientError, DaemonClient},
    config::Config,
    daemon::{Daemon, UpdateState},
    rpc::ErrorCode,
    types::{ManagerState, MISSING_DISTANCE, MISSING_ID},
};

fn test_config(dimensions: usize) -> Config {
    let mut config = Config::default();
    config.index.dimensions = dimensions;
    config.rpc.listen_addr = "127.0.0.1:0".to_string();
    config.rebuild.interval_secs = 0;
    config.rebuild.on_startup = false;
    config
}

async fn start(config: Config) -> (Daemon, DaemonClient) {
    let daemon = Daemon::start(config).await.unwrap();
    let client = DaemonClient::connect(daemon.rpc_addr()).await.unwrap();
    (daemon, client)
}

fn corpus() -> Vec<Vec<f32>> {
    vec![
        vec![0.0, 0.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0, 0.0],
        vec![5.0, 5.0, 5.0, 5.0],
    ]
}

/// Add vectors, rebuild, then search
#[tokio::test]
async fn test_add_trigger_search() {
    let (daemon, client) = start(test_config(4)).await;
    assert!(client.ping().await.unwrap());

    let status = client.add_vectors(corpus()).await.unwrap();
    assert_eq!(status.status, UpdateState::Queued);
    assert_eq!(status.message, "Queued 5 vectors for the next index update (5 pending).");

    let status = client.trigger_update().await.unwrap();
    assert_eq!(status.status, UpdateState::Processing);
    daemon.index_manager().wait_for_generation(1).await;

    let results = client
        .search(vec![vec![1.0, 0.0, 0.0, 0.0], vec![4.9, 5.0, 5.0, 5.0]], 3)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.indices.iter().all(|row| row.len() == 3));
    assert!(results.distances.iter().all(|row| row.len() == 3));
    assert_eq!(results.indices[0][0], 1);
    assert_eq!(results.distances[0][0], 0.0);
    assert_eq!(results.indices[1][0], 4);

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.index.state, ManagerState::Active);
    assert_eq!(stats.index.generation, 1);
    assert_eq!(stats.index.indexed_vectors, 5);
    assert_eq!(stats.index.pending_vectors, 0);

    daemon.shutdown().await.unwrap();
}

/// Search before the first build reports not ready; the connection survives
#[tokio::test]
async fn test_search_before_first_build() {
    let (daemon, client) = start(test_config(4)).await;

    let err = client.search(vec![vec![0.0; 4]], 1).await.unwrap_err();
    match err {
        ClientError::Daemon(e) => assert_eq!(e.code, ErrorCode::IndexNotReady),
        other => panic!("unexpected error: {other}"),
    }
    assert!(client.ping().await.unwrap());

    daemon.shutdown().await.unwrap();
}

/// Each rebuild folds in the queued vectors and bumps the generation
#[tokio::test]
async fn test_successive_rebuilds_accumulate() {
    let (daemon, client) = start(test_config(4)).await;
    let mut generations = daemon.index_manager().subscribe();

    client.add_vectors(corpus()).await.unwrap();
    client.trigger_update().await.unwrap();
    generations.wait_for(|g| *g >= 1).await.unwrap();

    client.add_vectors(vec![vec![9.0, 9.0, 9.0, 9.0]]).await.unwrap();
    client.trigger_update().await.unwrap();
    generations.wait_for(|g| *g >= 2).await.unwrap();

    let results = client.search(vec![vec![9.0, 9.0, 9.0, 9.0]], 1).await.unwrap();
    assert_eq!(results.indices, vec![vec![5]]);
    assert_eq!(client.stats().await.unwrap().index.indexed_vectors, 6);

    daemon.shutdown().await.unwrap();
}

/// A corpus smaller than k pads each row
#[tokio::test]
async fn test_small_corpus_is_padded() {
    let (daemon, client) = start(test_config(4)).await;
    client.add_vectors(corpus()[..2].to_vec()).await.unwrap();
    client.trigger_update().await.unwrap();
    daemon.index_manager().wait_for_generation(1).await;

    let results = client.search(vec![vec![0.0; 4]], 4).await.unwrap();
    assert_eq!(results.indices[0][..2], [0, 1]);
    assert_eq!(results.indices[0][2..], [MISSING_ID, MISSING_ID]);
    assert_eq!(results.distances[0][3], MISSING_DISTANCE);

    daemon.shutdown().await.unwrap();
}

/// Invalid input is rejected without touching the queue
#[tokio::test]
async fn test_rejected_batches() {
    let (daemon, client) = start(test_config(4)).await;

    let err = client
        .add_vectors(vec![vec![1.0; 4], vec![1.0; 3]])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Daemon(ref e) if e.code == ErrorCode::InvalidParams));

    let status = client.add_vectors(vec![]).await.unwrap();
    assert_eq!(status.status, UpdateState::NoChange);
    assert_eq!(status.message, "No vectors in request.");

    let err = client.search(vec![vec![1.0; 4]], 0).await.unwrap_err();
    assert!(matches!(err, ClientError::Daemon(ref e) if e.code == ErrorCode::InvalidParams));

    let err = client.search(vec![vec![1.0; 4]], 1 << 40).await.unwrap_err();
    assert!(matches!(err, ClientError::Daemon(ref e) if e.code == ErrorCode::InvalidParams));
    assert!(client.ping().await.unwrap());

    assert_eq!(client.stats().await.unwrap().index.pending_vectors, 0);
    daemon.shutdown().await.unwrap();
}

/// Many tasks share one connection; every caller gets its own answer
#[tokio::test]
async fn test_concurrent_calls_share_connection() {
    let (daemon, client) = start(test_config(4)).await;
    client.add_vectors(corpus()).await.unwrap();
    client.trigger_update().await.unwrap();
    daemon.index_manager().wait_for_generation(1).await;

    let client = Arc::new(client);
    let mut tasks = Vec::new();
    for i in 0..32usize {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let target = i % 5;
            let query = corpus()[target].clone();
            let results = client.search(vec![query], 1).await.unwrap();
            (target, results.indices[0][0])
        }));
    }

    for task in tasks {
        let (target, nearest) = task.await.unwrap();
        assert_eq!(nearest, target as i64);
    }
    assert_eq!(client.connection().pending_calls(), 0);

    daemon.shutdown().await.unwrap();
}

/// Shutting the daemon down fails the client's outstanding calls
#[tokio::test]
async fn test_shutdown_closes_client_connections() {
    let (daemon, client) = start(test_config(4)).await;
    daemon.shutdown().await.unwrap();

    client.connection().closed().await;
    let err = client.ping().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectionClosed | ClientError::RequestFailed(_)
    ));
}

/// The daemon starts from a config file with the HTTP API enabled
#[tokio::test]
async fn test_config_file_with_http() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vindex.toml");
    std::fs::write(
        &path,
        r#"
[index]
dimensions = 8
seed_vectors = 32

[rebuild]
interval_secs = 0
on_startup = true

[rpc]
listen_addr = "127.0.0.1:0"

[http]
enabled = true
listen_addr = "127.0.0.1:0"
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let daemon = Daemon::start(config).await.unwrap();
    daemon.index_manager().wait_for_generation(1).await;

    let http_addr = daemon.http_addr().unwrap();
    let mut stream = tokio::net::TcpStream::connect(http_addr).await.unwrap();
    stream
        .write_all(b"GET /stats HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"indexed_vectors\":32"));

    daemon.shutdown().await.unwrap();
}
