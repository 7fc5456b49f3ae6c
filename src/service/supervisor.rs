//! # Heartbeat & Reconnect Supervisor
//!
//! Client-side liveness and recovery.
//!
//! ## Heartbeat
//! [`heartbeat_loop`] runs once per connection. Each tick it first checks how
//! long the connection has been silent: past `idle_timeout` the peer is
//! considered hung and the connection is torn down with
//! [`ErrorCode::Timeout`], even though no I/O error was seen. Otherwise it
//! sends a `Heartbeat`, whose `HeartbeatAck` refreshes the activity clock.
//!
//! ## Reconnect
//! [`ReconnectPolicy`] bounds the attempts and fixes the delay between
//! them; [`ReconnectState`] counts attempts for one outage.

use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::constants::ERR_CONNECTION_TIMEOUT;
use crate::error::ErrorCode;
use crate::protocol::message::Packet;
use crate::transport::connection::Connection;

/// Bounded retry with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delay: config.reconnect_delay,
        }
    }
}

/// Attempt counter for one outage.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Send heartbeats every `interval` and drop the connection once it has been
/// silent for longer than `idle_timeout`. Returns when the connection closes.
pub async fn heartbeat_loop(connection: Connection, interval: Duration, idle_timeout: Duration) {
    let mut ticker = interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {}
        }

        let idle = connection.idle_for();
        if idle > idle_timeout {
            warn!(
                connection_id = %connection.id(),
                idle_ms = idle.as_millis() as u64,
                idle_timeout_ms = idle_timeout.as_millis() as u64,
                "No activity from server, dropping connection"
            );
            connection
                .disconnect(ERR_CONNECTION_TIMEOUT, Some(ErrorCode::Timeout))
                .await;
            break;
        }

        if let Err(e) = connection.send(&Packet::heartbeat()).await {
            debug!(connection_id = %connection.id(), error = %e, "Heartbeat not sent");
            break;
        }
    }

    debug!(connection_id = %connection.id(), "Heartbeat loop stopped");
}
