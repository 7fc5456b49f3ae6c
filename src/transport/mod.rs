//! # Transport Layer
//!
//! Byte-stream endpoints carrying framed packets.
//!
//! ## Components
//! - **Connection**: duplex endpoint with a receive loop, a serialized send
//!   path and idempotent teardown. Works over any `AsyncRead + AsyncWrite`
//!   stream, so tests run it over `tokio::io::duplex`.
//! - **TCP**: connect/accept helpers that wrap sockets into connections.

pub mod connection;
pub mod tcp;

pub use connection::{
    Connection, ConnectionEvents, ConnectionId, ConnectionOptions, DisconnectInfo, StatsSnapshot,
};
