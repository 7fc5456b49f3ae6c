//! # Authentication Service
//!
//! Login, logout, reconnect-by-token and heartbeat handlers for the server
//! dispatcher.
//!
//! Persistence and password hashing are outside this crate. They are reached
//! through two small traits:
//! - [`PlayerStore`]: looks players up by name
//! - [`PasswordVerifier`]: hashes and checks passwords
//!
//! [`InMemoryPlayerStore`] and [`PlainTextVerifier`] are enough for tests
//! and local development.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::constants::{ERR_INVALID_CREDENTIALS, ERR_SESSION_EXPIRED};
use crate::error::{ErrorCode, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, HandlerContext};
use crate::protocol::message::{Packet, PacketType, Payload, ResponseStatus};

/// Stored account data the service needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub player_id: u64,
    pub username: String,
    pub password_hash: String,
}

/// Account lookup backed by whatever persistence the server uses.
pub trait PlayerStore: Send + Sync + 'static {
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<PlayerRecord>>> + Send;
}

/// Password hashing capability.
pub trait PasswordVerifier: Send + Sync + 'static {
    fn hash_password(&self, password: &str) -> String;
    fn verify_password(&self, password: &str, hash: &str) -> bool;
}

/// Stores passwords as given. Development and tests only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextVerifier;

impl PasswordVerifier for PlainTextVerifier {
    fn hash_password(&self, password: &str) -> String {
        password.to_string()
    }

    fn verify_password(&self, password: &str, hash: &str) -> bool {
        password == hash
    }
}

/// Case-insensitive in-memory account table.
#[derive(Debug)]
pub struct InMemoryPlayerStore {
    players: DashMap<String, PlayerRecord>,
    next_id: AtomicU64,
}

impl Default for InMemoryPlayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add an account and return its player id.
    ///
    /// # Errors
    /// `AuthenticationFailed` if the name is empty or already taken.
    pub fn add_player(
        &self,
        username: &str,
        password: &str,
        verifier: &impl PasswordVerifier,
    ) -> Result<u64> {
        let key = username.to_lowercase();
        if key.is_empty() {
            return Err(ProtocolError::AuthenticationFailed(
                "Username cannot be empty".to_string(),
            ));
        }

        match self.players.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ProtocolError::AuthenticationFailed(
                format!("Username '{username}' is taken"),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let player_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                slot.insert(PlayerRecord {
                    player_id,
                    username: username.to_string(),
                    password_hash: verifier.hash_password(password),
                });
                Ok(player_id)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl PlayerStore for InMemoryPlayerStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<PlayerRecord>> {
        Ok(self
            .players
            .get(&username.to_lowercase())
            .map(|entry| entry.value().clone()))
    }
}

impl<S: PlayerStore> PlayerStore for Arc<S> {
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<PlayerRecord>>> + Send {
        (**self).find_by_username(username)
    }
}

pub struct AuthService<S, V> {
    store: S,
    verifier: V,
}

impl<S: PlayerStore, V: PasswordVerifier> AuthService<S, V> {
    pub fn new(store: S, verifier: V) -> Self {
        Self { store, verifier }
    }

    /// Install the heartbeat, login, reconnect and logout handlers.
    ///
    /// # Errors
    /// `HandlerError` if any of those packet types already has a handler.
    pub fn register_handlers(self: &Arc<Self>, dispatcher: &mut Dispatcher) -> Result<()> {
        dispatcher.register(PacketType::Heartbeat, false, |_ctx, _packet| async {
            Ok::<_, ProtocolError>(Some(Packet::heartbeat_ack()))
        })?;

        let auth = Arc::clone(self);
        dispatcher.register(PacketType::LoginRequest, false, move |ctx, packet| {
            let auth = Arc::clone(&auth);
            async move { auth.login(ctx, packet).await }
        })?;

        let auth = Arc::clone(self);
        dispatcher.register(PacketType::ReconnectRequest, false, move |ctx, packet| {
            let auth = Arc::clone(&auth);
            async move { auth.reconnect(ctx, packet) }
        })?;

        let auth = Arc::clone(self);
        dispatcher.register(PacketType::LogoutRequest, true, move |ctx, _packet| {
            let auth = Arc::clone(&auth);
            async move { auth.logout(ctx) }
        })?;

        Ok(())
    }

    async fn login(&self, ctx: HandlerContext, packet: Packet) -> Result<Option<Packet>> {
        let Payload::LoginRequest { username, password } = packet.payload else {
            return Err(ProtocolError::UnexpectedMessage);
        };

        let record = self.store.find_by_username(&username).await?;
        let Some(record) = record.filter(|r| self.verifier.verify_password(&password, &r.password_hash))
        else {
            ctx.metrics.auth_failure();
            warn!(
                connection_id = %ctx.connection.id(),
                username = %username,
                "Login rejected"
            );
            return Ok(Some(Packet::new(Payload::LoginResponse {
                status: ResponseStatus::failure(ErrorCode::InvalidCredentials, ERR_INVALID_CREDENTIALS),
                session_token: None,
                player_id: 0,
            })));
        };

        let token = ctx.sessions.create_session(record.player_id)?;
        ctx.sessions.bind_connection(&token, ctx.connection.id())?;
        ctx.metrics.session_created();

        info!(
            connection_id = %ctx.connection.id(),
            player_id = record.player_id,
            username = %record.username,
            "Player logged in"
        );

        Ok(Some(Packet::new(Payload::LoginResponse {
            status: ResponseStatus::ok(),
            session_token: Some(token),
            player_id: record.player_id,
        })))
    }

    fn reconnect(&self, ctx: HandlerContext, packet: Packet) -> Result<Option<Packet>> {
        let Payload::ReconnectRequest { session_token } = packet.payload else {
            return Err(ProtocolError::UnexpectedMessage);
        };

        let expired = || {
            Packet::new(Payload::ReconnectResponse {
                status: ResponseStatus::failure(ErrorCode::SessionExpired, ERR_SESSION_EXPIRED),
                player_id: 0,
            })
        };

        let Some(player_id) = ctx.sessions.get_player_id(&session_token) else {
            return Ok(Some(expired()));
        };

        let previous = match ctx.sessions.bind_connection(&session_token, ctx.connection.id()) {
            Ok(previous) => previous,
            Err(ProtocolError::SessionError(_)) => return Ok(Some(expired())),
            Err(e) => return Err(e),
        };
        ctx.metrics.session_resumed();

        info!(
            connection_id = %ctx.connection.id(),
            player_id,
            previous_connection = ?previous,
            "Session resumed"
        );

        Ok(Some(Packet::new(Payload::ReconnectResponse {
            status: ResponseStatus::ok(),
            player_id,
        })))
    }

    fn logout(&self, ctx: HandlerContext) -> Result<Option<Packet>> {
        // The dispatcher only runs this with a bound session.
        let Some(session) = ctx.session else {
            return Err(ProtocolError::SessionError(ERR_SESSION_EXPIRED.to_string()));
        };

        ctx.sessions.invalidate(&session.token);
        info!(
            connection_id = %ctx.connection.id(),
            player_id = session.player_id,
            "Player logged out"
        );

        Ok(Some(Packet::new(Payload::LogoutResponse {
            status: ResponseStatus::ok(),
        })))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_lookup_is_case_insensitive() {
        let store = InMemoryPlayerStore::new();
        let id = store
            .add_player("Alice", "secret", &PlainTextVerifier)
            .expect("add");

        let found = store
            .find_by_username("alice")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(found.player_id, id);
        assert_eq!(found.username, "Alice");
    }

    #[test]
    fn test_duplicate_usernames_rejected() {
        let store = InMemoryPlayerStore::new();
        store
            .add_player("bob", "pw", &PlainTextVerifier)
            .expect("add");
        assert!(store.add_player("BOB", "pw2", &PlainTextVerifier).is_err());
        assert!(store.add_player("", "pw", &PlainTextVerifier).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_plain_text_verifier() {
        let verifier = PlainTextVerifier;
        let hash = verifier.hash_password("validpass");
        assert!(verifier.verify_password("validpass", &hash));
        assert!(!verifier.verify_password("wrong", &hash));
    }
}
