//! Binary-protocol connection core for an EdgeDB/Gel client.
//!
//! This crate owns framing, handshake/auth, the granular query flow,
//! per-pool codec caches, connection pooling, and transactions. It does not
//! parse DSNs/environment variables into a [`config::ConnectConfig`], does
//! not implement a value-codec library, and does not interpret query
//! results beyond handing decoded rows back to the caller — those are
//! external collaborators (§1, §3, §6).

pub mod cache;
pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod errors;
pub mod flow;
mod ops;
pub mod pool;
pub mod protocol;
mod reconnect;
mod retry;
pub mod transaction;
mod transactable;
mod utils;

pub use cache::CodecCaches;
pub use codec::{CodecBuilder, Decoder, Encoder};
pub use config::ConnectConfig;
pub use context::Context;
pub use errors::{Error, ServerIdentifier, WrappedErrors};
pub use pool::{Pool, PoolConfig};
pub use protocol::ProtocolVersion;
pub use transactable::Transactable;

/// Alias matching the external-interfaces naming in §6 (`Tx::execute`,
/// `Tx::subtx`, ...) for callers coming from that vocabulary; the type
/// itself is [`transaction::Transaction`].
pub type Tx<'io> = transaction::Transaction<'io>;
