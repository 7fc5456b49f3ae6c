//! # Session Directory
//!
//! Server-side record of authenticated players.
//!
//! A session maps an unguessable token to a player id and, while the player is
//! online, to the connection currently carrying them. Sessions outlive their
//! connections: a client that drops can present its token again on a new
//! connection and pick up where it left off.
//!
//! ## Features
//! - **Sharded**: token and connection tables are `DashMap`s, so unrelated
//!   connections never serialize on one lock
//! - **Sliding expiry**: every successful lookup pushes expiry forward
//! - **Lazy + periodic eviction**: expired sessions vanish on lookup and in a
//!   background sweep
//! - **Derived status**: Online/Offline is computed from the binding, never
//!   stored separately
//!
//! ## Usage
//! ```rust
//! use arena_protocol::service::session::{SessionDirectory, SessionStatus};
//! use arena_protocol::transport::connection::ConnectionId;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> arena_protocol::error::Result<()> {
//! let sessions = SessionDirectory::new(Duration::from_secs(3600));
//! let token = sessions.create_session(42)?;
//! assert_eq!(sessions.get_player_id(&token), Some(42));
//!
//! let conn = ConnectionId::next();
//! sessions.bind_connection(&token, conn)?;
//! assert_eq!(sessions.get_session(&token).map(|s| s.status), Some(SessionStatus::Online));
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::constants::ERR_SESSION_EXPIRED;
use crate::error::{ProtocolError, Result};
use crate::transport::connection::ConnectionId;

/// Random bytes per token; hex encoding doubles the length.
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Online,
    Offline,
}

#[derive(Debug)]
struct Session {
    player_id: u64,
    connection: Option<ConnectionId>,
    created_at: SystemTime,
    expires_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Read-only view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub token: String,
    pub player_id: u64,
    pub connection: Option<ConnectionId>,
    pub status: SessionStatus,
    pub created_at: SystemTime,
    pub expires_in: Duration,
}

pub struct SessionDirectory {
    expiry: Duration,
    sessions: DashMap<String, Session>,
    by_connection: DashMap<ConnectionId, String>,
}

impl SessionDirectory {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            sessions: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Mint a token for `player_id`. The session starts unbound.
    ///
    /// # Errors
    /// `SessionError` if the system RNG is unavailable.
    pub fn create_session(&self, player_id: u64) -> Result<String> {
        let token = generate_token()?;
        self.sessions.insert(
            token.clone(),
            Session {
                player_id,
                connection: None,
                created_at: SystemTime::now(),
                expires_at: Instant::now() + self.expiry,
            },
        );

        info!(player_id, sessions = self.sessions.len(), "Session created");
        Ok(token)
    }

    /// Whether `token` names a live session. Slides its expiry.
    pub fn is_valid(&self, token: &str) -> bool {
        self.get_player_id(token).is_some()
    }

    /// Player behind `token`, if the session is live. Slides its expiry.
    pub fn get_player_id(&self, token: &str) -> Option<u64> {
        let now = Instant::now();
        {
            let mut session = self.sessions.get_mut(token)?;
            if !session.is_expired(now) {
                session.expires_at = now + self.expiry;
                return Some(session.player_id);
            }
        }

        self.evict_if_expired(token, now);
        None
    }

    /// Attach `token` to `connection`, replacing any earlier binding.
    ///
    /// Returns the connection that was bound before, if any. That connection
    /// no longer resolves to this session.
    ///
    /// # Errors
    /// `SessionError` when the token is unknown or expired.
    pub fn bind_connection(&self, token: &str, connection: ConnectionId) -> Result<Option<ConnectionId>> {
        let now = Instant::now();

        let (previous, displaced) = {
            let Some(mut session) = self.sessions.get_mut(token) else {
                return Err(ProtocolError::SessionError(ERR_SESSION_EXPIRED.to_string()));
            };

            if session.is_expired(now) {
                drop(session);
                self.evict_if_expired(token, now);
                return Err(ProtocolError::SessionError(ERR_SESSION_EXPIRED.to_string()));
            }

            let previous = session.connection.replace(connection);
            session.expires_at = now + self.expiry;

            // Session record and index change under the same shard guard.
            let displaced = self.by_connection.insert(connection, token.to_string());
            if let Some(old) = previous.filter(|old| *old != connection) {
                self.by_connection.remove_if(&old, |_, bound| bound == token);
            }

            (previous, displaced.filter(|other| other != token))
        };

        // The connection was carrying a different session; that one goes offline.
        if let Some(other) = displaced {
            if let Some(mut session) = self.sessions.get_mut(&other) {
                if session.connection == Some(connection) {
                    session.connection = None;
                }
            }
        }

        debug!(
            connection_id = %connection,
            previous = ?previous,
            "Session bound to connection"
        );
        Ok(previous.filter(|old| *old != connection))
    }

    /// Detach whatever session `connection` carries. The session stays valid
    /// (Offline) so the player can reconnect.
    pub fn unbind_connection(&self, connection: ConnectionId) -> Option<String> {
        let (_, token) = self.by_connection.remove(&connection)?;

        if let Some(mut session) = self.sessions.get_mut(&token) {
            if session.connection == Some(connection) {
                session.connection = None;
                trace!(connection_id = %connection, "Session unbound");
            }
        }
        Some(token)
    }

    /// Session carried by `connection`, verified against the session record.
    /// Slides its expiry.
    pub fn session_for_connection(&self, connection: ConnectionId) -> Option<SessionInfo> {
        let token = self.by_connection.get(&connection)?.value().clone();
        let now = Instant::now();

        {
            let mut session = self.sessions.get_mut(&token)?;
            if session.connection == Some(connection) && !session.is_expired(now) {
                session.expires_at = now + self.expiry;
                return Some(snapshot(&token, &session, now));
            }
        }

        self.evict_if_expired(&token, now);
        None
    }

    /// Remove `token` for good (logout or revocation).
    pub fn invalidate(&self, token: &str) -> Option<SessionInfo> {
        let now = Instant::now();
        let (token, session) = self.sessions.remove(token)?;
        if let Some(connection) = session.connection {
            self.by_connection.remove_if(&connection, |_, bound| *bound == token);
        }

        info!(player_id = session.player_id, "Session invalidated");
        Some(snapshot(&token, &session, now))
    }

    /// Look up a session without sliding its expiry.
    pub fn get_session(&self, token: &str) -> Option<SessionInfo> {
        let now = Instant::now();
        let session = self.sessions.get(token)?;
        if session.is_expired(now) {
            return None;
        }
        Some(snapshot(token, &session, now))
    }

    /// Remove every expired session.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = expired
            .iter()
            .filter(|token| self.evict_if_expired(token, now))
            .count();

        if removed > 0 {
            info!(removed, remaining = self.sessions.len(), "Expired sessions swept");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        directory.sweep_expired();
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().connection.is_some())
            .count()
    }

    fn evict_if_expired(&self, token: &str, now: Instant) -> bool {
        let Some((_, session)) = self
            .sessions
            .remove_if(token, |_, session| session.is_expired(now))
        else {
            return false;
        };

        if let Some(connection) = session.connection {
            self.by_connection.remove_if(&connection, |_, bound| bound == token);
        }
        debug!(player_id = session.player_id, "Session expired");
        true
    }
}

fn snapshot(token: &str, session: &Session, now: Instant) -> SessionInfo {
    SessionInfo {
        token: token.to_string(),
        player_id: session.player_id,
        connection: session.connection,
        status: if session.connection.is_some() {
            SessionStatus::Online
        } else {
            SessionStatus::Offline
        },
        created_at: session.created_at,
        expires_in: session.expires_at.saturating_duration_since(now),
    }
}

fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|e| ProtocolError::SessionError(format!("Token generation failed: {e}")))?;

    let mut token = String::with_capacity(TOKEN_BYTES * 2);
    for byte in bytes {
        let _ = write!(token, "{byte:02x}");
    }
    Ok(token)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    const EXPIRY: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_create_and_resolve() {
        let sessions = SessionDirectory::new(EXPIRY);
        let token = sessions.create_session(42).expect("create");

        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(sessions.is_valid(&token));
        assert_eq!(sessions.get_player_id(&token), Some(42));
        assert_eq!(
            sessions.get_session(&token).map(|s| s.status),
            Some(SessionStatus::Offline)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_are_unique() {
        let sessions = SessionDirectory::new(EXPIRY);
        let a = sessions.create_session(1).expect("create");
        let b = sessions.create_session(1).expect("create");
        assert_ne!(a, b);
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_without_activity() {
        let sessions = SessionDirectory::new(EXPIRY);
        let token = sessions.create_session(42).expect("create");

        tokio::time::advance(EXPIRY).await;
        assert!(!sessions.is_valid(&token));
        assert!(sessions.is_empty(), "lookup evicts the expired session");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_slides_on_lookup() {
        let sessions = SessionDirectory::new(EXPIRY);
        let token = sessions.create_session(7).expect("create");

        tokio::time::advance(EXPIRY / 2).await;
        assert!(sessions.is_valid(&token));
        tokio::time::advance(EXPIRY / 2 + Duration::from_secs(1)).await;
        assert!(sessions.is_valid(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebind_evicts_old_connection() {
        let sessions = SessionDirectory::new(EXPIRY);
        let token = sessions.create_session(42).expect("create");
        let old = ConnectionId::next();
        let new = ConnectionId::next();

        assert_eq!(sessions.bind_connection(&token, old).expect("bind"), None);
        assert_eq!(sessions.bind_connection(&token, new).expect("rebind"), Some(old));

        assert!(sessions.session_for_connection(old).is_none());
        let info = sessions.session_for_connection(new).expect("bound");
        assert_eq!(info.player_id, 42);
        assert_eq!(info.status, SessionStatus::Online);

        // A late unbind from the old connection must not take the player offline.
        assert!(sessions.unbind_connection(old).is_none());
        assert_eq!(
            sessions.get_session(&token).map(|s| s.connection),
            Some(Some(new))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_switching_sessions() {
        let sessions = SessionDirectory::new(EXPIRY);
        let first = sessions.create_session(1).expect("create");
        let second = sessions.create_session(2).expect("create");
        let conn = ConnectionId::next();

        sessions.bind_connection(&first, conn).expect("bind");
        sessions.bind_connection(&second, conn).expect("bind");

        assert_eq!(
            sessions.get_session(&first).map(|s| s.status),
            Some(SessionStatus::Offline)
        );
        assert_eq!(
            sessions.session_for_connection(conn).map(|s| s.player_id),
            Some(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_keeps_session() {
        let sessions = SessionDirectory::new(EXPIRY);
        let token = sessions.create_session(5).expect("create");
        let conn = ConnectionId::next();
        sessions.bind_connection(&token, conn).expect("bind");

        assert_eq!(sessions.unbind_connection(conn), Some(token.clone()));
        assert!(sessions.is_valid(&token));
        assert_eq!(
            sessions.get_session(&token).map(|s| s.status),
            Some(SessionStatus::Offline)
        );
        assert_eq!(sessions.online_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_bind_failures() {
        let sessions = SessionDirectory::new(EXPIRY);
        let token = sessions.create_session(5).expect("create");
        let conn = ConnectionId::next();
        sessions.bind_connection(&token, conn).expect("bind");

        assert!(sessions.invalidate(&token).is_some());
        assert!(sessions.session_for_connection(conn).is_none());
        assert!(matches!(
            sessions.bind_connection(&token, conn),
            Err(ProtocolError::SessionError(_))
        ));
        assert!(sessions.invalidate(&token).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let sessions = SessionDirectory::new(EXPIRY);
        let stale = sessions.create_session(1).expect("create");
        let conn = ConnectionId::next();
        sessions.bind_connection(&stale, conn).expect("bind");

        tokio::time::advance(EXPIRY / 2).await;
        let fresh = sessions.create_session(2).expect("create");
        tokio::time::advance(EXPIRY / 2).await;

        assert_eq!(sessions.sweep_expired(), 1);
        assert!(sessions.get_session(&fresh).is_some());
        assert!(sessions.session_for_connection(conn).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let sessions = Arc::new(SessionDirectory::new(EXPIRY));
        sessions.create_session(1).expect("create");

        let shutdown = CancellationToken::new();
        let handle = sessions.spawn_sweeper(Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(EXPIRY + Duration::from_secs(15)).await;
        assert!(sessions.is_empty());

        shutdown.cancel();
        handle.await.expect("sweeper");
    }
}
