//! Protocol timing constants and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Socket/request timeout. Bounds correlated requests, sweeps stale pending
/// entries and sizes the rate-limit window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between client liveness packets.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Silence after which a connection is considered dead. Four heartbeat intervals.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for a TCP connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Sliding expiry for server sessions.
pub const SESSION_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval of the background session sweep.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Maximum accepted clock difference on packet timestamps.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Time allowed for the best-effort disconnect notice before the socket closes.
pub const DISCONNECT_NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time the server waits for connections to drain on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_timeout_spans_several_heartbeats() {
        assert!(IDLE_TIMEOUT >= KEEPALIVE_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_error_elapses() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_with_timeout_error_passes_through() {
        let result = with_timeout_error(async { Ok(42u32) }, Duration::from_secs(1)).await;
        assert_eq!(result.ok(), Some(42));
    }
}
