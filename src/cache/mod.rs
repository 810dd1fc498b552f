//! Descriptor and codec caches (C4, C5).

pub mod codec_cache;
pub mod descriptor;
pub mod query_key;

pub use codec_cache::CodecCaches;
pub use query_key::{IdPair, QueryKey, TypeToken};
