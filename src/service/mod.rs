//! # Services
//!
//! Client and server built on the transport and protocol layers.
//!
//! ## Components
//! - **Session**: server-side token directory with sliding expiry
//! - **Auth**: login, logout, reconnect and heartbeat handlers
//! - **Server**: accept loop, per-connection dispatch, graceful shutdown
//! - **Client**: connection owner with events, login and session resumption
//! - **Supervisor**: client heartbeat and reconnect policy

pub mod auth;
pub mod client;
pub mod server;
pub mod session;
pub mod supervisor;
