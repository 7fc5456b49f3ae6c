//! # Game Server
//!
//! TCP accept loop that wraps sockets in [`Connection`]s and feeds their
//! inbound packets through the [`Dispatcher`].
//!
//! ## Lifecycle
//! - Every accepted socket gets one task that processes its packets strictly
//!   in arrival order. Different connections are independent.
//! - When a connection closes its session is unbound (the player goes
//!   Offline but may reconnect), its rate-limit windows are dropped and it
//!   leaves the registry.
//! - Background tasks sweep expired sessions and stale rate-limit windows.
//! - On shutdown every live connection gets a `ServerMaintenance` disconnect
//!   notice, then the server waits up to `shutdown_timeout` for them to drain.
//!
//! ## Example Usage
//! ```rust,no_run
//! use arena_protocol::config::NetworkConfig;
//! use arena_protocol::service::auth::{InMemoryPlayerStore, PlainTextVerifier};
//! use arena_protocol::service::server::GameServer;
//! use std::sync::Arc;
//!
//! # async fn run() -> arena_protocol::error::Result<()> {
//! let store = Arc::new(InMemoryPlayerStore::new());
//! store.add_player("a", "validpass", &PlainTextVerifier)?;
//!
//! let server = GameServer::with_auth(NetworkConfig::default(), store, PlainTextVerifier)?;
//! server.run().await
//! # }
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::constants::{ERR_SERVER_FULL, ERR_SERVER_SHUTDOWN};
use crate::error::{ErrorCode, Result};
use crate::protocol::dispatcher::{DispatchOutcome, Dispatcher};
use crate::protocol::message::Packet;
use crate::service::auth::{AuthService, PasswordVerifier, PlayerStore};
use crate::service::session::SessionDirectory;
use crate::transport::connection::{Connection, ConnectionEvents, ConnectionId, ConnectionOptions};
use crate::transport::tcp;
use crate::utils::metrics::Metrics;

type ConnectionMap = Arc<DashMap<ConnectionId, Connection>>;

pub struct GameServer {
    config: NetworkConfig,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionMap,
    shutdown: CancellationToken,
}

impl GameServer {
    /// Server around an already populated dispatcher.
    pub fn new(config: NetworkConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            connections: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Server with a fresh session directory and the authentication handlers installed.
    ///
    /// # Errors
    /// Fails only if handler registration conflicts.
    pub fn with_auth<S, V>(config: NetworkConfig, store: S, verifier: V) -> Result<Self>
    where
        S: PlayerStore,
        V: PasswordVerifier,
    {
        let sessions = Arc::new(SessionDirectory::new(config.server.session_expiry));
        let metrics = Arc::new(Metrics::new());
        let mut dispatcher = Dispatcher::new(sessions, config.rate_limit.clone(), metrics)
            .with_clock_skew(config.protocol.max_clock_skew);

        Arc::new(AuthService::new(store, verifier)).register_handlers(&mut dispatcher)?;
        Ok(Self::new(config, dispatcher))
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionDirectory> {
        self.dispatcher.sessions()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.dispatcher.metrics()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every registered connection.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Bind the configured address and serve until CTRL+C.
    #[instrument(skip(self), fields(address = %self.config.server.address))]
    pub async fn run(&self) -> Result<()> {
        let listener = tcp::bind(&self.config.server.address).await?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(listener, shutdown_rx).await
    }

    /// Serve on `listener` until a message arrives on `shutdown_rx` (or every
    /// sender is dropped).
    pub async fn run_with_shutdown(
        &self,
        listener: TcpListener,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Server listening");

        let sweeper = self.dispatcher.sessions().spawn_sweeper(
            self.config.server.session_sweep_interval,
            self.shutdown.child_token(),
        );
        let rate_sweeper = self.spawn_rate_limit_sweeper();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    }
                }
            }
        }

        drop(listener);
        self.drain().await;

        self.shutdown.cancel();
        let _ = sweeper.await;
        let _ = rate_sweeper.await;

        self.metrics().log_metrics();
        info!("Server stopped");
        Ok(())
    }

    /// Send `packet` to every open connection. Returns how many accepted it.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        let targets = self.connections();

        join_all(targets.iter().map(|conn| conn.send(packet)))
            .await
            .into_iter()
            .filter(|result| result.is_ok())
            .count()
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let options = ConnectionOptions::from_config(
            &self.config.protocol,
            self.config.server.backpressure_limit,
        );

        let (connection, events) = match tcp::adopt(stream, options) {
            Ok(adopted) => adopted,
            Err(e) => {
                warn!(remote = %addr, error = %e, "Failed to set up connection");
                return;
            }
        };

        if self.connections.len() >= self.config.server.max_connections {
            self.metrics().connection_rejected();
            warn!(
                remote = %addr,
                max_connections = self.config.server.max_connections,
                "Server full, rejecting connection"
            );
            tokio::spawn(async move {
                connection
                    .disconnect_with_notice(ERR_SERVER_FULL, Some(ErrorCode::ServerFull))
                    .await;
                drop(events);
            });
            return;
        }

        self.connections.insert(connection.id(), connection.clone());
        self.metrics().connection_established();
        info!(connection_id = %connection.id(), remote = %addr, "Client connected");

        tokio::spawn(serve_connection(
            connection,
            events,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.connections),
        ));
    }

    fn spawn_rate_limit_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let shutdown = self.shutdown.child_token();
        let period = self.config.rate_limit.window;

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = dispatcher.rate_limiter().sweep_stale();
                        if removed > 0 {
                            debug!(removed, "Stale rate-limit windows swept");
                        }
                    }
                }
            }
        })
    }

    async fn drain(&self) {
        let live = self.connections();

        join_all(live.iter().map(|conn| {
            conn.disconnect_with_notice(ERR_SERVER_SHUTDOWN, Some(ErrorCode::ServerMaintenance))
        }))
        .await;

        let deadline = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(deadline);

        while !self.connections.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(remaining = self.connections.len(), "Shutdown timeout reached, forcing exit");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    debug!(connections = self.connections.len(), "Waiting for connections to close");
                }
            }
        }
    }
}

async fn serve_connection(
    connection: Connection,
    events: ConnectionEvents,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionMap,
) {
    let ConnectionEvents {
        mut inbound,
        closed,
    } = events;

    // Ends once the receive loop stops and drops its sender, or as soon as
    // teardown has begun. Anything still buffered is discarded.
    while let Some(packet) = inbound.recv().await {
        if dispatcher.process(&connection, packet).await == DispatchOutcome::Closed {
            break;
        }
    }

    let reason = match closed.await {
        Ok(info) => info.reason,
        Err(_) => String::from("unknown"),
    };

    let id = connection.id();
    if let Some(token) = dispatcher.sessions().unbind_connection(id) {
        debug!(connection_id = %id, token_len = token.len(), "Session left online state");
    }
    dispatcher.connection_closed(&connection);
    connections.remove(&id);
    dispatcher.metrics().connection_closed();

    let stats = connection.stats();
    info!(
        connection_id = %id,
        reason = %reason,
        packets_received = stats.packets_received,
        packets_sent = stats.packets_sent,
        "Client disconnected"
    );
}
