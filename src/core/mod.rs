//! # Core Protocol Components
//!
//! Low-level framing and body serialization.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed frames over byte streams
//! - **Serialization**: bincode encoding of packet bodies, keyed by type tag
//!
//! ## Wire Format
//! ```text
//! [Length(4, i32 little-endian)] [Body(N)]
//! ```
//!
//! ## Failure classes
//! - A bad length header or a truncated frame means protocol sync is lost:
//!   the connection must close.
//! - A body that fails to deserialize is a single malformed packet on an
//!   otherwise healthy stream: it is counted, not fatal.
//! - Length is validated before any body allocation.

pub mod codec;
pub mod serialization;
