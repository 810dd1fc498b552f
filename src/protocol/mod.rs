//! Binary wire protocol: framing, message shapes, and small value types.
//!
//! This module has no knowledge of sockets, caches, or pooling; it only
//! knows how to turn typed requests into bytes and bytes into typed
//! responses (C1 in the design).

pub mod constants;
pub mod frame;
pub mod messages;
pub mod types;

pub use frame::{FrameReader, FrameWriter};
pub use messages::{parse_server_message, ServerMessage};
pub use types::{Cardinality, IoFormat, Language, ProtocolFlavor, ProtocolVersion, TransactionState};
