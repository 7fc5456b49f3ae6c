//! # Connection
//!
//! One duplex endpoint over a byte stream, identical on client and server.
//!
//! ## Tasks
//! - **Receive loop**: reads frames in arrival order, offers each decoded
//!   packet to the correlator, forwards everything else to the owner's
//!   inbound channel.
//! - **Housekeeping**: sweeps correlator entries whose waiters went away.
//!
//! ## Send Path
//! All writes go through one `tokio::sync::Mutex` around the framed writer,
//! so a header and its body are never interleaved with another frame.
//! Oversized packets are refused before any byte is written.
//!
//! ## Teardown
//! [`Connection::disconnect`] runs at most once no matter how many paths
//! reach it (receive failure, send failure, idle timeout, explicit close).
//! It cancels the lifetime token, releases every pending request, closes the
//! writer and publishes a single [`DisconnectInfo`].
//!
//! ## Example Usage
//! ```rust,no_run
//! use arena_protocol::protocol::message::Packet;
//! use arena_protocol::transport::connection::{Connection, ConnectionOptions};
//! use std::time::Duration;
//!
//! # async fn demo(stream: tokio::net::TcpStream) -> arena_protocol::error::Result<()> {
//! let (conn, mut events) = Connection::spawn(stream, "server", ConnectionOptions::default());
//!
//! let request = Packet::login_request("a", "validpass").with_correlation_id(conn.next_correlation_id());
//! if let Some(reply) = conn.send_request(request, Duration::from_secs(5)).await? {
//!     println!("reply: {:?}", reply.payload);
//! }
//!
//! while let Some(packet) = events.inbound.recv().await {
//!     println!("unsolicited: {}", packet.packet_type());
//! }
//! # Ok(())
//! # }
//! ```

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ProtocolConfig, FRAME_HEADER_LEN, MAX_CONSECUTIVE_DESERIALIZATION_ERRORS, MAX_PACKET_SIZE};
use crate::core::codec::{decode_packet, encode_packet, FrameCodec};
use crate::error::constants::{ERR_REMOTE_CLOSED, ERR_TOO_MANY_MALFORMED};
use crate::error::{ErrorCode, ProtocolError, Result};
use crate::protocol::correlator::{Correlator, RequestOutcome};
use crate::protocol::message::{Packet, Payload};
use crate::utils::timeout::{DEFAULT_TIMEOUT, DISCONNECT_NOTICE_TIMEOUT};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection went down. Published exactly once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub reason: String,
    pub error_code: Option<ErrorCode>,
    /// `true` when teardown was requested through [`Connection::disconnect`]
    /// rather than observed on the stream.
    pub initiated_locally: bool,
}

impl DisconnectInfo {
    pub fn allows_reconnect(&self) -> bool {
        self.error_code.map_or(true, ErrorCode::allows_reconnect)
    }
}

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub max_packet_size: usize,
    pub max_deserialization_errors: u32,
    /// Capacity of the inbound channel; a full channel pauses the receive loop.
    pub inbound_buffer: usize,
    pub request_sweep_interval: Duration,
    pub request_max_age: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            max_deserialization_errors: MAX_CONSECUTIVE_DESERIALIZATION_ERRORS,
            inbound_buffer: 64,
            request_sweep_interval: DEFAULT_TIMEOUT,
            request_max_age: DEFAULT_TIMEOUT,
        }
    }
}

impl ConnectionOptions {
    pub fn from_config(protocol: &ProtocolConfig, inbound_buffer: usize) -> Self {
        Self {
            max_packet_size: protocol.max_packet_size,
            max_deserialization_errors: protocol.max_deserialization_errors,
            inbound_buffer: inbound_buffer.max(1),
            request_sweep_interval: protocol.request_timeout,
            request_max_age: protocol.request_timeout,
        }
    }
}

/// Per-connection counters. Monotonic; read through [`ConnectionStats::snapshot`].
#[derive(Debug, Default)]
pub struct ConnectionStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
    receive_errors: AtomicU64,
    deserialization_errors: AtomicU64,
    requests_timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    pub deserialization_errors: u64,
    pub requests_timed_out: u64,
}

impl ConnectionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            deserialization_errors: self.deserialization_errors.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Channels handed to whoever owns the connection.
pub struct ConnectionEvents {
    /// Packets that did not answer a pending request, in arrival order.
    pub inbound: mpsc::Receiver<Packet>,
    /// Fires once when the connection is torn down.
    pub closed: oneshot::Receiver<DisconnectInfo>,
}

type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

struct Inner {
    id: ConnectionId,
    remote: String,
    connected_at: SystemTime,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    options: ConnectionOptions,
    stats: ConnectionStats,
    correlator: Correlator,
    writer: Mutex<FrameWriter>,
    lifetime: CancellationToken,
    closed: AtomicBool,
    closed_tx: std::sync::Mutex<Option<oneshot::Sender<DisconnectInfo>>>,
    disconnect_info: std::sync::Mutex<Option<DisconnectInfo>>,
}

/// Cheaply cloneable handle to a live (or torn down) connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Take ownership of `stream` and start the receive and housekeeping tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(
        stream: S,
        remote: impl Into<String>,
        options: ConnectionOptions,
    ) -> (Connection, ConnectionEvents)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let codec = FrameCodec::new(options.max_packet_size);
        let frames = FramedRead::new(read_half, codec);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);

        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_buffer.max(1));
        let (closed_tx, closed_rx) = oneshot::channel();

        let connection = Connection {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                remote: remote.into(),
                connected_at: SystemTime::now(),
                epoch: Instant::now(),
                last_activity_ms: AtomicU64::new(0),
                options,
                stats: ConnectionStats::default(),
                correlator: Correlator::new(),
                writer: Mutex::new(FramedWrite::new(writer, codec)),
                lifetime: CancellationToken::new(),
                closed: AtomicBool::new(false),
                closed_tx: std::sync::Mutex::new(Some(closed_tx)),
                disconnect_info: std::sync::Mutex::new(None),
            }),
        };

        debug!(
            connection_id = %connection.id(),
            remote = %connection.remote_addr(),
            "Connection established"
        );

        tokio::spawn(receive_loop(connection.clone(), frames, inbound_tx));
        tokio::spawn(housekeeping_loop(connection.clone()));

        (
            connection,
            ConnectionEvents {
                inbound: inbound_rx,
                closed: closed_rx,
            },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.inner.remote
    }

    pub fn connected_at(&self) -> SystemTime {
        self.inner.connected_at
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Time since the last frame arrived (or since connect, if none has).
    pub fn idle_for(&self) -> Duration {
        let now_ms = self.inner.epoch.elapsed().as_millis() as u64;
        let last_ms = self.inner.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_ms.saturating_sub(last_ms))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn next_correlation_id(&self) -> u32 {
        self.inner.correlator.next_id()
    }

    /// Teardown details, once the connection is down.
    pub fn disconnect_info(&self) -> Option<DisconnectInfo> {
        self.inner
            .disconnect_info
            .lock()
            .ok()
            .and_then(|info| info.clone())
    }

    /// Resolves once teardown has started.
    pub async fn closed(&self) {
        self.inner.lifetime.cancelled().await;
    }

    /// Token cancelled on teardown; child tokens stop with the connection.
    pub fn lifetime(&self) -> &CancellationToken {
        &self.inner.lifetime
    }

    /// Write one packet.
    ///
    /// # Errors
    /// `NotConnected` after teardown, `OversizedPacket` when the body exceeds
    /// the limit (nothing is written and the connection stays up), or the I/O
    /// error that brought the connection down.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }

        let body = encode_packet(packet, self.inner.options.max_packet_size)?;
        let frame_len = (body.len() + FRAME_HEADER_LEN) as u64;
        let lifetime = &self.inner.lifetime;

        let result = {
            let mut writer = tokio::select! {
                _ = lifetime.cancelled() => return Err(ProtocolError::NotConnected),
                writer = self.inner.writer.lock() => writer,
            };
            tokio::select! {
                _ = lifetime.cancelled() => Err(ProtocolError::NotConnected),
                sent = writer.send(body) => sent,
            }
        };

        match result {
            Ok(()) => {
                self.inner.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.inner.stats.bytes_sent.fetch_add(frame_len, Ordering::Relaxed);
                trace!(
                    connection_id = %self.id(),
                    packet_type = %packet.packet_type(),
                    correlation_id = ?packet.correlation_id(),
                    "Packet sent"
                );
                Ok(())
            }
            Err(ProtocolError::NotConnected) => Err(ProtocolError::NotConnected),
            Err(e) if e.is_fatal_to_connection() => {
                self.inner.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %self.id(), error = %e, "Send failed");
                self.teardown(format!("Send failed: {e}"), None, false).await;
                Err(e)
            }
            Err(e) => {
                self.inner.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Send a correlated request and wait for its reply.
    ///
    /// Returns `Ok(None)` on timeout or when the connection dies while waiting.
    pub async fn send_request(&self, request: Packet, timeout: Duration) -> Result<Option<Packet>> {
        self.send_request_with_cancel(request, timeout, &CancellationToken::new())
            .await
    }

    /// [`send_request`](Self::send_request) that also stops when `cancel` fires.
    ///
    /// # Errors
    /// `MissingCorrelationId`, `DuplicateCorrelationId`, `Cancelled`,
    /// `UnexpectedMessage`, or whatever `send` fails with.
    #[instrument(
        skip(self, request, cancel),
        fields(
            connection_id = %self.id(),
            packet_type = %request.packet_type(),
            correlation_id = ?request.correlation_id()
        )
    )]
    pub async fn send_request_with_cancel(
        &self,
        request: Packet,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Packet>> {
        let id = request
            .correlation_id()
            .ok_or(ProtocolError::MissingCorrelationId)?;

        // Registered before the write so a fast reply always finds its waiter.
        let waiter = self
            .inner
            .correlator
            .register(id, request.packet_type().expected_response())?;

        self.send(&request).await?;

        let outcome = waiter.wait(timeout, cancel, &self.inner.lifetime).await?;
        match outcome {
            RequestOutcome::TimedOut => {
                self.inner
                    .stats
                    .requests_timed_out
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Request timed out without a reply");
                Ok(None)
            }
            RequestOutcome::ConnectionLost => {
                debug!("Connection lost while waiting for a reply");
                Ok(None)
            }
            RequestOutcome::Completed(reply) => Ok(Some(reply)),
        }
    }

    /// Tear the connection down. Later calls are no-ops.
    pub async fn disconnect(&self, reason: impl Into<String>, error_code: Option<ErrorCode>) {
        self.teardown(reason.into(), error_code, true).await;
    }

    /// Best-effort `Disconnect` notice, then teardown.
    pub async fn disconnect_with_notice(
        &self,
        reason: impl Into<String>,
        error_code: Option<ErrorCode>,
    ) {
        let reason = reason.into();
        if self.is_connected() {
            let notice = Packet::disconnect(reason.clone(), error_code);
            match tokio::time::timeout(DISCONNECT_NOTICE_TIMEOUT, self.send(&notice)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(connection_id = %self.id(), error = %e, "Disconnect notice not delivered"),
                Err(_) => debug!(connection_id = %self.id(), "Disconnect notice timed out"),
            }
        }
        self.teardown(reason, error_code, true).await;
    }

    fn touch(&self) {
        let now_ms = self.inner.epoch.elapsed().as_millis() as u64;
        self.inner.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }

    async fn teardown(&self, reason: String, error_code: Option<ErrorCode>, initiated_locally: bool) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.lifetime.cancel();
        let released = self.inner.correlator.cancel_all();

        // Bounded so a peer that stopped reading cannot stall teardown.
        let close = async {
            let mut writer = self.inner.writer.lock().await;
            writer.close().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(DISCONNECT_NOTICE_TIMEOUT, close).await {
            debug!(connection_id = %self.id(), error = %e, "Error closing writer");
        }

        let info = DisconnectInfo {
            reason,
            error_code,
            initiated_locally,
        };

        info!(
            connection_id = %self.id(),
            remote = %self.remote_addr(),
            reason = %info.reason,
            error_code = ?info.error_code,
            released_requests = released,
            "Connection closed"
        );

        if let Ok(mut slot) = self.inner.disconnect_info.lock() {
            *slot = Some(info.clone());
        }
        let closed_tx = self.inner.closed_tx.lock().ok().and_then(|mut tx| tx.take());
        if let Some(tx) = closed_tx {
            let _ = tx.send(info);
        }
    }
}

async fn receive_loop<R>(
    connection: Connection,
    mut frames: FramedRead<R, FrameCodec>,
    inbound: mpsc::Sender<Packet>,
) where
    R: AsyncRead + Unpin,
{
    let inner = &connection.inner;
    let max_errors = inner.options.max_deserialization_errors;
    let mut consecutive_errors: u32 = 0;
    // Reason announced by the peer before it closes the stream.
    let mut peer_notice: Option<(String, Option<ErrorCode>)> = None;

    let (reason, error_code) = loop {
        let next = tokio::select! {
            _ = inner.lifetime.cancelled() => return,
            next = frames.next() => next,
        };

        let body = match next {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                inner.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                let code = match e {
                    ProtocolError::InvalidFrameLength(_) => Some(ErrorCode::InvalidPacket),
                    _ => None,
                };
                warn!(connection_id = %connection.id(), error = %e, "Receive failed");
                break (format!("Receive failed: {e}"), code);
            }
            None => break peer_notice.unwrap_or_else(|| (ERR_REMOTE_CLOSED.to_string(), None)),
        };

        connection.touch();
        inner.stats.packets_received.fetch_add(1, Ordering::Relaxed);
        inner
            .stats
            .bytes_received
            .fetch_add((body.len() + FRAME_HEADER_LEN) as u64, Ordering::Relaxed);

        let packet = match decode_packet(&body) {
            Ok(packet) => {
                consecutive_errors = 0;
                packet
            }
            Err(e) => {
                inner
                    .stats
                    .deserialization_errors
                    .fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                warn!(
                    connection_id = %connection.id(),
                    error = %e,
                    consecutive = consecutive_errors,
                    "Dropping malformed packet"
                );
                if consecutive_errors > max_errors {
                    break (ERR_TOO_MANY_MALFORMED.to_string(), Some(ErrorCode::MalformedPacket));
                }
                continue;
            }
        };

        trace!(
            connection_id = %connection.id(),
            packet_type = %packet.packet_type(),
            correlation_id = ?packet.correlation_id(),
            "Packet received"
        );

        if let Payload::Disconnect {
            reason, error_code, ..
        } = &packet.payload
        {
            peer_notice = Some((reason.clone(), *error_code));
        }

        let Some(packet) = inner.correlator.try_complete(packet) else {
            continue;
        };

        tokio::select! {
            _ = inner.lifetime.cancelled() => return,
            delivered = inbound.send(packet) => {
                if delivered.is_err() {
                    trace!(connection_id = %connection.id(), "Inbound receiver dropped; discarding packet");
                }
            }
        }
    };

    connection.teardown(reason, error_code, false).await;
}

async fn housekeeping_loop(connection: Connection) {
    let interval_len = connection.inner.options.request_sweep_interval;
    let max_age = connection.inner.options.request_max_age;
    let mut interval = tokio::time::interval_at(Instant::now() + interval_len, interval_len);

    loop {
        tokio::select! {
            _ = connection.inner.lifetime.cancelled() => break,
            _ = interval.tick() => {
                connection.inner.correlator.sweep_expired(max_age);
            }
        }
    }
}
