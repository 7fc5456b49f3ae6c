//! # Game Client
//!
//! Client half of the protocol: one [`Connection`] to the server plus the
//! supervision around it.
//!
//! ## Features
//! - **Events over a channel**: connection changes and unsolicited packets
//!   arrive as [`ClientEvent`]s
//! - **Heartbeat**: liveness packets and idle-timeout detection per connection
//! - **Auto-reconnect**: bounded retries with a fixed delay after an
//!   unintentional disconnect whose error code allows it
//! - **Session resumption**: after a reconnect the held [`ClientSession`]
//!   token is presented again with a `ReconnectRequest`
//!
//! A disconnect requested through [`GameClient::disconnect`] or
//! [`GameClient::shutdown`] never triggers reconnection.
//!
//! ## Example Usage
//! ```rust,no_run
//! use arena_protocol::config::NetworkConfig;
//! use arena_protocol::service::client::{ClientEvent, GameClient};
//!
//! # async fn run() -> arena_protocol::error::Result<()> {
//! let (client, mut events) = GameClient::new(NetworkConfig::default());
//! client.connect().await?;
//! let session = client.login("a", "validpass").await?;
//! println!("logged in as player {}", session.player_id);
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Packet(packet) = event {
//!         println!("server says: {:?}", packet.payload);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::NetworkConfig;
use crate::error::constants::{REASON_MODULE_UNLOADING, REASON_USER_DISCONNECTED};
use crate::error::{ErrorCode, ProtocolError, Result};
use crate::protocol::message::{Packet, Payload};
use crate::service::supervisor::{heartbeat_loop, ReconnectPolicy, ReconnectState};
use crate::transport::connection::{Connection, ConnectionEvents, ConnectionOptions, DisconnectInfo};
use crate::transport::tcp;

/// Everything the owner of a client hears about.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    /// Unsolicited packet from the server.
    Packet(Packet),
    Disconnected(DisconnectInfo),
    Reconnecting { attempt: u32 },
    Reconnected,
    ReconnectFailed { attempts: u32 },
    SessionResumed { player_id: u64 },
    /// The held session could not be resumed and was dropped.
    SessionLost { reason: String },
}

/// Identity held after a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub player_id: u64,
    pub session_token: String,
}

struct ClientInner {
    config: NetworkConfig,
    connection: std::sync::Mutex<Option<Connection>>,
    session: std::sync::Mutex<Option<ClientSession>>,
    events: mpsc::Sender<ClientEvent>,
    disconnects: mpsc::Sender<DisconnectInfo>,
    disconnects_rx: std::sync::Mutex<Option<mpsc::Receiver<DisconnectInfo>>>,
    /// Set by `disconnect`/`shutdown`; cleared by `connect`.
    intentional: AtomicBool,
    /// Set when the server's disconnect notice forbids reconnecting.
    reconnect_vetoed: AtomicBool,
    next_correlation_id: AtomicU32,
    connect_lock: Mutex<()>,
    shutdown: CancellationToken,
}

/// Cloneable client handle.
#[derive(Clone)]
pub struct GameClient {
    inner: Arc<ClientInner>,
}

impl GameClient {
    pub fn new(config: NetworkConfig) -> (GameClient, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.client.event_buffer.max(1));
        let (disconnects_tx, disconnects_rx) = mpsc::channel(4);

        let client = GameClient {
            inner: Arc::new(ClientInner {
                config,
                connection: std::sync::Mutex::new(None),
                session: std::sync::Mutex::new(None),
                events: events_tx,
                disconnects: disconnects_tx,
                disconnects_rx: std::sync::Mutex::new(Some(disconnects_rx)),
                intentional: AtomicBool::new(false),
                reconnect_vetoed: AtomicBool::new(false),
                next_correlation_id: AtomicU32::new(1),
                connect_lock: Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        };

        (client, events_rx)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|conn| conn.is_connected())
    }

    /// Live connection, if any.
    pub fn connection(&self) -> Option<Connection> {
        self.current().filter(Connection::is_connected)
    }

    pub fn session(&self) -> Option<ClientSession> {
        self.inner
            .session
            .lock()
            .ok()
            .and_then(|session| session.clone())
    }

    /// Fresh non-zero correlation id, unique for this client across reconnects.
    pub fn next_correlation_id(&self) -> u32 {
        loop {
            let id = self.inner.next_correlation_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Connect to the configured server. A no-op when already connected.
    ///
    /// # Errors
    /// `Timeout` or `Io` when the server cannot be reached; `Cancelled` after
    /// [`shutdown`](Self::shutdown).
    #[instrument(skip(self), fields(address = %self.inner.config.client.address))]
    pub async fn connect(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }
        self.inner.intentional.store(false, Ordering::Release);
        self.start_supervisor();

        if self.establish().await? {
            self.emit(ClientEvent::Connected).await;
        }
        Ok(())
    }

    /// Intentional disconnect; no reconnection follows.
    pub async fn disconnect(&self) {
        self.inner.intentional.store(true, Ordering::Release);
        if let Some(conn) = self.current() {
            conn.disconnect(REASON_USER_DISCONNECTED, None).await;
        }
    }

    /// Disconnect and stop every background task for good.
    pub async fn shutdown(&self) {
        self.inner.intentional.store(true, Ordering::Release);
        self.inner.shutdown.cancel();
        if let Some(conn) = self.current() {
            conn.disconnect(REASON_MODULE_UNLOADING, None).await;
        }
    }

    /// # Errors
    /// `NotConnected` without a live connection, otherwise as [`Connection::send`].
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        self.require_connection()?.send(packet).await
    }

    /// Correlated request on the current connection. `Ok(None)` on timeout or
    /// when the connection drops while waiting.
    pub async fn send_request(&self, request: Packet, timeout: Duration) -> Result<Option<Packet>> {
        self.require_connection()?
            .send_request(request, timeout)
            .await
    }

    pub async fn send_request_with_cancel(
        &self,
        request: Packet,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Packet>> {
        self.require_connection()?
            .send_request_with_cancel(request, timeout, cancel)
            .await
    }

    /// Authenticate and keep the resulting session for later reconnects.
    ///
    /// # Errors
    /// `AuthenticationFailed` with the server's message when refused,
    /// `Timeout`/`NotConnected` when no answer arrives.
    pub async fn login(&self, username: &str, password: &str) -> Result<ClientSession> {
        let request =
            Packet::login_request(username, password).with_correlation_id(self.next_correlation_id());
        let reply = self.request(request).await?;

        match reply.payload {
            Payload::LoginResponse {
                status,
                session_token: Some(session_token),
                player_id,
            } if status.success => {
                let session = ClientSession {
                    player_id,
                    session_token,
                };
                self.store_session(Some(session.clone()));
                info!(player_id, "Logged in");
                Ok(session)
            }
            Payload::LoginResponse { status, .. } | Payload::ErrorResponse { status } => {
                Err(ProtocolError::AuthenticationFailed(
                    status
                        .message
                        .unwrap_or_else(|| String::from("login refused")),
                ))
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// End the server session. The local session is dropped either way.
    ///
    /// # Errors
    /// `SessionError` when the server refuses, `Timeout`/`NotConnected` when
    /// no answer arrives.
    pub async fn logout(&self) -> Result<()> {
        let request = Packet::new(Payload::LogoutRequest).with_correlation_id(self.next_correlation_id());
        let reply = self.request(request).await;
        self.store_session(None);

        match reply?.payload {
            Payload::LogoutResponse { status } if status.success => Ok(()),
            Payload::LogoutResponse { status } | Payload::ErrorResponse { status } => {
                Err(ProtocolError::SessionError(
                    status
                        .message
                        .unwrap_or_else(|| String::from("logout refused")),
                ))
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    async fn request(&self, request: Packet) -> Result<Packet> {
        let timeout = self.inner.config.client.response_timeout;
        match self.send_request(request, timeout).await? {
            Some(reply) => Ok(reply),
            None if self.is_connected() => Err(ProtocolError::Timeout),
            None => Err(ProtocolError::NotConnected),
        }
    }

    fn current(&self) -> Option<Connection> {
        self.inner
            .connection
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    fn require_connection(&self) -> Result<Connection> {
        self.connection().ok_or(ProtocolError::NotConnected)
    }

    fn store_session(&self, session: Option<ClientSession>) {
        if let Ok(mut slot) = self.inner.session.lock() {
            *slot = session;
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.inner.events.send(event).await.is_err() {
            trace!("Client event receiver dropped");
        }
    }

    /// Open a connection unless one is already live. Returns whether a new
    /// connection was opened.
    async fn establish(&self) -> Result<bool> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(false);
        }

        let config = &self.inner.config;
        let options = ConnectionOptions::from_config(&config.protocol, config.client.event_buffer);
        let (conn, events) =
            tcp::connect(&config.client.address, config.client.connection_timeout, options).await?;

        self.inner.reconnect_vetoed.store(false, Ordering::Release);
        if let Ok(mut slot) = self.inner.connection.lock() {
            *slot = Some(conn.clone());
        }

        info!(connection_id = %conn.id(), remote = %conn.remote_addr(), "Connected to server");

        tokio::spawn(heartbeat_loop(
            conn.clone(),
            config.client.heartbeat_interval,
            config.client.idle_timeout,
        ));
        tokio::spawn(pump(self.clone(), conn, events));
        Ok(true)
    }

    fn start_supervisor(&self) {
        let receiver = self
            .inner
            .disconnects_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());

        if let Some(receiver) = receiver {
            tokio::spawn(supervise(self.clone(), receiver));
        }
    }

    fn should_reconnect(&self, info: &DisconnectInfo) -> bool {
        let intentional = self.inner.intentional.load(Ordering::Acquire)
            || info.reason == REASON_USER_DISCONNECTED
            || info.reason == REASON_MODULE_UNLOADING;

        self.inner.config.client.auto_reconnect
            && !intentional
            && !self.inner.shutdown.is_cancelled()
            && !self.inner.reconnect_vetoed.load(Ordering::Acquire)
            && info.allows_reconnect()
    }

    async fn reconnect(&self) -> Result<()> {
        let mut state = ReconnectState::new(ReconnectPolicy::from_config(&self.inner.config.client));

        while let Some(delay) = state.next_delay() {
            if self.is_connected() {
                return Ok(());
            }

            let attempt = state.attempts();
            self.emit(ClientEvent::Reconnecting { attempt }).await;

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Err(ProtocolError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            // Someone else connected, or the user gave up, while we waited.
            if self.is_connected() {
                debug!(attempt, "Already connected, abandoning reconnect");
                return Ok(());
            }
            if self.inner.intentional.load(Ordering::Acquire) {
                return Err(ProtocolError::Cancelled);
            }

            match self.establish().await {
                Ok(false) => return Ok(()),
                Ok(true) => {
                    info!(attempt, "Reconnected");
                    self.emit(ClientEvent::Reconnected).await;
                    self.resume_session().await;
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }

        let attempts = state.attempts();
        warn!(attempts, "Giving up on reconnecting");
        self.emit(ClientEvent::ReconnectFailed { attempts }).await;
        Err(ProtocolError::ReconnectExhausted(attempts))
    }

    async fn resume_session(&self) {
        let Some(session) = self.session() else {
            return;
        };

        let request = Packet::new(Payload::ReconnectRequest {
            session_token: session.session_token.clone(),
        })
        .with_correlation_id(self.next_correlation_id());

        let lost = match self.request(request).await {
            Ok(reply) => match reply.payload {
                Payload::ReconnectResponse { status, player_id } if status.success => {
                    info!(player_id, "Session resumed");
                    self.emit(ClientEvent::SessionResumed { player_id }).await;
                    return;
                }
                other => other
                    .status()
                    .and_then(|status| status.message.clone())
                    .unwrap_or_else(|| String::from("session refused")),
            },
            Err(e) => e.to_string(),
        };

        warn!(reason = %lost, "Session could not be resumed");
        self.store_session(None);
        self.emit(ClientEvent::SessionLost { reason: lost }).await;
    }
}

/// Forward one connection's inbound packets, then report its teardown.
async fn pump(client: GameClient, conn: Connection, events: ConnectionEvents) {
    let ConnectionEvents {
        mut inbound,
        closed,
    } = events;

    while let Some(packet) = inbound.recv().await {
        match packet.payload {
            Payload::HeartbeatAck { .. } => {
                trace!(connection_id = %conn.id(), "Heartbeat acknowledged");
            }
            Payload::Disconnect {
                reason,
                error_code,
                reconnect_allowed,
            } => {
                info!(
                    connection_id = %conn.id(),
                    reason = %reason,
                    error_code = ?error_code,
                    reconnect_allowed,
                    "Server closed the connection"
                );
                if !reconnect_allowed {
                    client.inner.reconnect_vetoed.store(true, Ordering::Release);
                }
                conn.disconnect(reason, error_code).await;
            }
            _ => client.emit(ClientEvent::Packet(packet)).await,
        }
    }

    let info = closed.await.unwrap_or_else(|_| DisconnectInfo {
        reason: crate::error::constants::ERR_CONNECTION_CLOSED.to_string(),
        error_code: Some(ErrorCode::Unknown),
        initiated_locally: false,
    });

    if let Ok(mut slot) = client.inner.connection.lock() {
        if slot.as_ref().is_some_and(|current| current.id() == conn.id()) {
            *slot = None;
        }
    }

    client.emit(ClientEvent::Disconnected(info.clone())).await;
    if client.inner.disconnects.send(info).await.is_err() {
        trace!("Client supervisor stopped");
    }
}

/// Decide, per teardown, whether to reconnect.
async fn supervise(client: GameClient, mut disconnects: mpsc::Receiver<DisconnectInfo>) {
    loop {
        let info = tokio::select! {
            _ = client.inner.shutdown.cancelled() => break,
            info = disconnects.recv() => match info {
                Some(info) => info,
                None => break,
            },
        };

        if !client.should_reconnect(&info) {
            debug!(reason = %info.reason, "Not reconnecting");
            continue;
        }

        if let Err(e) = client.reconnect().await {
            debug!(error = %e, "Reconnect ended without a connection");
        }
    }
}
