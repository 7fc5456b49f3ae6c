//! # Rate Limiter
//!
//! Fixed-window request budgets per `(connection, packet type)` pair.
//!
//! Each pair gets its own counter that resets once its window has elapsed.
//! Budgets come from [`RateLimitConfig`], so login attempts can be held much
//! tighter than chat or heartbeats. A violation is reported to the caller;
//! the dispatcher treats it as hostile and drops the connection.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::protocol::message::PacketType;
use crate::transport::connection::ConnectionId;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Result of one budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { limit: u32, window: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<(ConnectionId, PacketType), Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one packet against its budget.
    pub fn check(&self, connection: ConnectionId, packet_type: PacketType) -> RateDecision {
        let limit = self.config.limit_for(packet_type);
        let now = Instant::now();

        let mut window = self
            .windows
            .entry((connection, packet_type))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) >= self.config.window {
            window.started = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);

        if window.count > limit {
            debug!(
                connection_id = %connection,
                packet_type = %packet_type,
                count = window.count,
                limit,
                "Rate limit exceeded"
            );
            RateDecision::Limited {
                limit,
                window: self.config.window,
            }
        } else {
            RateDecision::Allowed {
                remaining: limit - window.count,
            }
        }
    }

    /// Forget every window belonging to a closed connection.
    pub fn remove_connection(&self, connection: ConnectionId) {
        self.windows.retain(|(owner, _), _| *owner != connection);
    }

    /// Drop windows that have fully elapsed; they would reset on next use anyway.
    pub fn sweep_stale(&self) -> usize {
        let before = self.windows.len();
        let window = self.config.window;
        self.windows
            .retain(|_, state| state.started.elapsed() < window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
