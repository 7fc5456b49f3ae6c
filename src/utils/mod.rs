//! # Utility Modules
//!
//! Supporting utilities shared by client and server.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: Thread-safe server counters
//! - **Time**: Wall-clock timestamps and skew checks
//! - **Timeout**: Protocol timing constants and async timeout wrappers

pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
