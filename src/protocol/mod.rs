//! # Protocol Layer
//!
//! Packet model and the logic that moves packets between peers.
//!
//! ## Components
//! - **Message**: packet envelope, payloads and response status
//! - **Correlator**: matches replies to outstanding requests
//! - **Rate Limit**: per-(connection, packet type) budgets
//! - **Dispatcher**: routes server-side packets to registered handlers

pub mod correlator;
pub mod dispatcher;
pub mod message;
pub mod rate_limit;
