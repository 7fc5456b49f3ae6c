//! # Packet Dispatcher
//!
//! Routes inbound server packets to handlers registered by packet type.
//!
//! The registry is built once at startup, then shared read-only. Each entry
//! says whether the handler needs an authenticated session.
//!
//! ## Processing Order
//! 1. Rate check per `(connection, packet type)`. A violation disconnects.
//! 2. Envelope validation. Invalid packets get `InvalidPacket`.
//! 3. Handler lookup. Unknown types get `UnsupportedPacket` if correlated,
//!    otherwise they are ignored.
//! 4. Authentication gate. No bound session means `AuthenticationRequired`.
//! 5. Handler call. Its response inherits the inbound correlation id.
//! 6. Handler errors and panics become `InternalError`; the connection and
//!    every other connection carry on.
//!
//! Error responses are only sent for correlated packets; an uncorrelated
//! packet has no waiter on the other side to release.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::config::RateLimitConfig;
use crate::error::constants::{
    ERR_AUTH_REQUIRED, ERR_INTERNAL, ERR_INVALID_PACKET, ERR_RATE_LIMITED, ERR_UNSUPPORTED_PACKET,
};
use crate::error::{ErrorCode, ProtocolError, Result};
use crate::protocol::message::{Packet, PacketType};
use crate::protocol::rate_limit::{RateDecision, RateLimiter};
use crate::service::session::{SessionDirectory, SessionInfo};
use crate::transport::connection::Connection;
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::timeout::MAX_CLOCK_SKEW;

/// Everything a handler may touch while serving one packet.
#[derive(Clone)]
pub struct HandlerContext {
    pub connection: Connection,
    pub sessions: Arc<SessionDirectory>,
    pub metrics: Arc<Metrics>,
    /// Session bound to the connection when the packet arrived.
    pub session: Option<SessionInfo>,
}

type HandlerFn =
    dyn Fn(HandlerContext, Packet) -> BoxFuture<'static, Result<Option<Packet>>> + Send + Sync;

struct HandlerEntry {
    requires_auth: bool,
    handler: Box<HandlerFn>,
}

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler ran and its response was sent.
    Responded,
    /// Handler ran and had nothing to send.
    Handled,
    /// No handler and no correlation id; dropped.
    Ignored,
    /// Refused before the handler ran.
    Rejected(ErrorCode),
    /// Handler failed or panicked.
    HandlerFailed,
    /// Budget exceeded; the connection was closed.
    RateLimited,
    /// The connection was already torn down; nothing ran.
    Closed,
}

pub struct Dispatcher {
    handlers: HashMap<PacketType, HandlerEntry>,
    rate_limiter: RateLimiter,
    sessions: Arc<SessionDirectory>,
    metrics: Arc<Metrics>,
    max_clock_skew: Duration,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionDirectory>,
        rate_limits: RateLimitConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handlers: HashMap::new(),
            rate_limiter: RateLimiter::new(rate_limits),
            sessions,
            metrics,
            max_clock_skew: MAX_CLOCK_SKEW,
        }
    }

    /// Accept packet timestamps up to `skew` away from the local clock.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Install the handler for `packet_type`.
    ///
    /// # Errors
    /// `HandlerError` if the type already has one.
    pub fn register<F, Fut>(&mut self, packet_type: PacketType, requires_auth: bool, handler: F) -> Result<()>
    where
        F: Fn(HandlerContext, Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Packet>>> + Send + 'static,
    {
        if self.handlers.contains_key(&packet_type) {
            return Err(ProtocolError::HandlerError(format!(
                "Handler for {packet_type} already registered"
            )));
        }

        self.handlers.insert(
            packet_type,
            HandlerEntry {
                requires_auth,
                handler: Box::new(move |ctx, packet| handler(ctx, packet).boxed()),
            },
        );
        debug!(packet_type = %packet_type, requires_auth, "Handler registered");
        Ok(())
    }

    pub fn has_handler(&self, packet_type: PacketType) -> bool {
        self.handlers.contains_key(&packet_type)
    }

    pub fn sessions(&self) -> &Arc<SessionDirectory> {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Serve one inbound packet from `connection`.
    pub async fn process(&self, connection: &Connection, packet: Packet) -> DispatchOutcome {
        let packet_type = packet.packet_type();
        let correlation_id = packet.correlation_id();

        // Packets still queued behind a teardown must not reach handlers.
        if !connection.is_connected() {
            trace!(connection_id = %connection.id(), packet_type = %packet_type, "Connection closed; dropping packet");
            return DispatchOutcome::Closed;
        }
        self.metrics.packet_dispatched();

        if let RateDecision::Limited { limit, window } =
            self.rate_limiter.check(connection.id(), packet_type)
        {
            self.metrics.rate_limit_violation();
            warn!(
                connection_id = %connection.id(),
                packet_type = %packet_type,
                limit,
                window_ms = window.as_millis() as u64,
                "Rate limit exceeded, disconnecting"
            );
            connection
                .disconnect_with_notice(ERR_RATE_LIMITED, Some(ErrorCode::RateLimited))
                .await;
            return DispatchOutcome::RateLimited;
        }

        if !packet.is_valid_within(self.max_clock_skew) {
            self.metrics.invalid_packet();
            debug!(connection_id = %connection.id(), packet_type = %packet_type, "Invalid packet");
            return self
                .reject(connection, correlation_id, ErrorCode::InvalidPacket, ERR_INVALID_PACKET)
                .await;
        }

        let Some(entry) = self.handlers.get(&packet_type) else {
            self.metrics.unsupported_packet();
            if correlation_id.is_none() {
                debug!(connection_id = %connection.id(), packet_type = %packet_type, "No handler; ignoring");
                return DispatchOutcome::Ignored;
            }
            return self
                .reject(
                    connection,
                    correlation_id,
                    ErrorCode::UnsupportedPacket,
                    ERR_UNSUPPORTED_PACKET,
                )
                .await;
        };

        let session = self.sessions.session_for_connection(connection.id());
        if entry.requires_auth && session.is_none() {
            self.metrics.auth_required();
            return self
                .reject(
                    connection,
                    correlation_id,
                    ErrorCode::AuthenticationRequired,
                    ERR_AUTH_REQUIRED,
                )
                .await;
        }

        let ctx = HandlerContext {
            connection: connection.clone(),
            sessions: Arc::clone(&self.sessions),
            metrics: Arc::clone(&self.metrics),
            session,
        };

        let result = {
            let _timer = Timer::start("dispatch_handler");
            // The call itself runs inside the guarded future so a panic while
            // building the future is caught too.
            AssertUnwindSafe(async { (entry.handler)(ctx, packet).await })
                .catch_unwind()
                .await
        };

        match result {
            Ok(Ok(Some(mut response))) => {
                response.set_correlation_id(correlation_id.unwrap_or(0));
                match connection.send(&response).await {
                    Ok(()) => {
                        self.metrics.response_sent();
                        DispatchOutcome::Responded
                    }
                    Err(e) => {
                        debug!(connection_id = %connection.id(), error = %e, "Response not delivered");
                        DispatchOutcome::Handled
                    }
                }
            }
            Ok(Ok(None)) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                self.metrics.handler_error();
                error!(
                    connection_id = %connection.id(),
                    packet_type = %packet_type,
                    error = %e,
                    "Handler failed"
                );
                self.reject(connection, correlation_id, ErrorCode::InternalError, ERR_INTERNAL)
                    .await;
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                self.metrics.handler_error();
                error!(
                    connection_id = %connection.id(),
                    packet_type = %packet_type,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                self.reject(connection, correlation_id, ErrorCode::InternalError, ERR_INTERNAL)
                    .await;
                DispatchOutcome::HandlerFailed
            }
        }
    }

    /// Forget per-connection state once a connection closes.
    pub fn connection_closed(&self, connection: &Connection) {
        self.rate_limiter.remove_connection(connection.id());
    }

    async fn reject(
        &self,
        connection: &Connection,
        correlation_id: Option<u32>,
        code: ErrorCode,
        message: &str,
    ) -> DispatchOutcome {
        if correlation_id.is_some() {
            let response = Packet::error_response(code, message, correlation_id);
            if let Err(e) = connection.send(&response).await {
                debug!(connection_id = %connection.id(), error = %e, "Error response not delivered");
            }
        }
        DispatchOutcome::Rejected(code)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
