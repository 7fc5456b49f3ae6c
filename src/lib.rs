//! # Arena Protocol
//!
//! Request/response networking core for multiplayer game clients and servers.
//!
//! ## Layers
//! - **core**: length-prefixed framing and bincode packet bodies
//! - **protocol**: packet envelope, reply correlation, rate limiting, dispatch
//! - **transport**: the duplex [`Connection`](transport::Connection) and TCP glue
//! - **service**: game server, game client, sessions, auth, heartbeat and reconnect
//! - **utils**: logging, metrics and timing helpers
//!
//! ## Wire Format
//! ```text
//! [Length(4, i32 little-endian)] [Body(N): bincode packet]
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use arena_protocol::config::NetworkConfig;
//! use arena_protocol::service::client::GameClient;
//!
//! # async fn run() -> arena_protocol::error::Result<()> {
//! let (client, mut events) = GameClient::new(NetworkConfig::default());
//! client.connect().await?;
//! let session = client.login("a", "validpass").await?;
//! println!("logged in as player {}", session.player_id);
//! # while let Some(_event) = events.recv().await {}
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ErrorCode, ProtocolError, Result};
pub use protocol::message::{Packet, PacketType, Payload, ResponseStatus};
pub use service::client::{ClientEvent, GameClient};
pub use service::server::GameServer;
pub use transport::connection::{Connection, ConnectionId, DisconnectInfo};
