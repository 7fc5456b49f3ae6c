//! Observability and Metrics
//!
//! Server-wide counters for connections, dispatch outcomes, authentication
//! and sessions. One [`Metrics`] instance is created by the server and shared
//! by `Arc` with the dispatcher and the authentication handlers.
//!
//! Uses atomic counters for thread-safe metrics collection.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Server metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Connections refused because the server was full
    pub connections_rejected: AtomicU64,
    /// Packets handed to the dispatcher
    pub packets_dispatched: AtomicU64,
    /// Responses written back by the dispatcher
    pub responses_sent: AtomicU64,
    /// Packets failing envelope validation
    pub invalid_packets: AtomicU64,
    /// Packets with no registered handler
    pub unsupported_packets: AtomicU64,
    /// Handler errors and panics
    pub handler_errors: AtomicU64,
    /// Connections dropped for exceeding a rate limit
    pub rate_limit_violations: AtomicU64,
    /// Requests refused for lack of a session
    pub auth_required_rejections: AtomicU64,
    /// Failed login attempts
    pub auth_failures: AtomicU64,
    /// Sessions created by successful logins
    pub sessions_created: AtomicU64,
    /// Sessions resumed through reconnect requests
    pub sessions_resumed: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            packets_dispatched: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            invalid_packets: AtomicU64::new(0),
            unsupported_packets: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            rate_limit_violations: AtomicU64::new(0),
            auth_required_rejections: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_resumed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_dispatched(&self) {
        self.packets_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_packet(&self) {
        self.invalid_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsupported_packet(&self) {
        self.unsupported_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limit_violation(&self) {
        self.rate_limit_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_required(&self) {
        self.auth_required_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_resumed(&self) {
        self.sessions_resumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            unsupported_packets: self.unsupported_packets.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
            auth_required_rejections: self.auth_required_rejections.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_resumed: self.sessions_resumed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            packets_dispatched = snapshot.packets_dispatched,
            responses_sent = snapshot.responses_sent,
            invalid_packets = snapshot.invalid_packets,
            unsupported_packets = snapshot.unsupported_packets,
            handler_errors = snapshot.handler_errors,
            rate_limit_violations = snapshot.rate_limit_violations,
            auth_required_rejections = snapshot.auth_required_rejections,
            auth_failures = snapshot.auth_failures,
            sessions_created = snapshot.sessions_created,
            sessions_resumed = snapshot.sessions_resumed,
            uptime_seconds = snapshot.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub packets_dispatched: u64,
    pub responses_sent: u64,
    pub invalid_packets: u64,
    pub unsupported_packets: u64,
    pub handler_errors: u64,
    pub rate_limit_violations: u64,
    pub auth_required_rejections: u64,
    pub auth_failures: u64,
    pub sessions_created: u64,
    pub sessions_resumed: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
    }

    #[test]
    fn test_counters_are_independent() {
        let metrics = Metrics::new();
        metrics.auth_failure();
        metrics.rate_limit_violation();
        metrics.rate_limit_violation();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.auth_failures, 1);
        assert_eq!(snapshot.rate_limit_violations, 2);
        assert_eq!(snapshot.handler_errors, 0);
    }
}
