//! Shared harness: a logged-in-capable server on an ephemeral port.

#![allow(dead_code, clippy::expect_used)]

use arena_protocol::config::NetworkConfig;
use arena_protocol::service::auth::{InMemoryPlayerStore, PlainTextVerifier};
use arena_protocol::service::client::ClientEvent;
use arena_protocol::service::server::GameServer;
use arena_protocol::transport::tcp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "a";
pub const PASSWORD: &str = "validpass";

pub struct TestServer {
    pub server: Arc<GameServer>,
    pub address: String,
    pub shutdown: mpsc::Sender<()>,
    pub task: JoinHandle<arena_protocol::Result<()>>,
}

impl TestServer {
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        self.task.await.expect("server task").expect("server result");
    }
}

/// Timings short enough for tests over real sockets.
pub fn fast_config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|config| {
        config.server.address = "127.0.0.1:0".to_string();
        config.server.shutdown_timeout = Duration::from_secs(2);
        config.client.connection_timeout = Duration::from_secs(2);
        config.client.response_timeout = Duration::from_secs(2);
        config.client.reconnect_delay = Duration::from_millis(50);
        config.client.max_reconnect_attempts = 3;
    })
}

pub async fn start_server(mut config: NetworkConfig) -> TestServer {
    let store = Arc::new(InMemoryPlayerStore::new());
    store
        .add_player(USERNAME, PASSWORD, &PlainTextVerifier)
        .expect("add player");
    for i in 0..64 {
        store
            .add_player(&format!("player{i}"), PASSWORD, &PlainTextVerifier)
            .expect("add player");
    }

    let listener = tcp::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr").to_string();
    config.server.address = address.clone();
    config.client.address = address.clone();

    let server = Arc::new(GameServer::with_auth(config, store, PlainTextVerifier).expect("server"));
    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with_shutdown(listener, shutdown_rx).await }
    });

    TestServer {
        server,
        address,
        shutdown,
        task,
    }
}

/// Client config pointed at `server`.
pub fn client_config(server: &TestServer) -> NetworkConfig {
    let mut config = server.server.config().clone();
    config.client.address = server.address.clone();
    config
}

pub async fn next_event(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event channel open")
}

/// Wait until `condition` holds, polling briefly.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(condition(), "condition never became true");
}
