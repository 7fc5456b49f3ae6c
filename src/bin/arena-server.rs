//! Standalone game server.
//!
//! Usage: `arena-server [config.toml]`. Without a file the configuration comes
//! from defaults plus `ARENA_PROTOCOL_*` environment overrides. Accounts are
//! read from `ARENA_PLAYERS` as `name:password` pairs separated by commas.

use arena_protocol::config::NetworkConfig;
use arena_protocol::error::{ProtocolError, Result};
use arena_protocol::service::auth::{InMemoryPlayerStore, PlainTextVerifier};
use arena_protocol::service::server::GameServer;
use arena_protocol::utils::logging::init_logging;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let store = Arc::new(InMemoryPlayerStore::new());
    let players = std::env::var("ARENA_PLAYERS").unwrap_or_default();
    for entry in players.split(',').filter(|entry| !entry.is_empty()) {
        let (name, password) = entry.split_once(':').ok_or_else(|| {
            ProtocolError::ConfigError(format!("Invalid ARENA_PLAYERS entry: '{entry}'"))
        })?;
        store.add_player(name, password, &PlainTextVerifier)?;
    }
    if store.is_empty() {
        warn!("No accounts configured; every login will be refused");
    }

    info!(players = store.len(), address = %config.server.address, "Starting arena server");
    let server = GameServer::with_auth(config, store, PlainTextVerifier)?;
    server.run().await
}
