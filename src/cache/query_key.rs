//! Key types shared by the descriptor and codec caches (C4, C5).

use std::any::TypeId;

use uuid::Uuid;

use crate::protocol::{Cardinality, IoFormat, Language};

/// Primary key for the per-connection type-id and capabilities caches.
///
/// Structural equality: two queries that differ only in the order they were
/// issued hash and compare identically, per the "insertion order is
/// irrelevant" contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub command: String,
    pub output_format: IoFormat,
    pub expected_cardinality: Cardinality,
    pub user_output_type: TypeId,
    pub language: Language,
}

impl QueryKey {
    pub fn new(
        command: impl Into<String>,
        output_format: IoFormat,
        expected_cardinality: Cardinality,
        user_output_type: TypeId,
        language: Language,
    ) -> Self {
        Self {
            command: command.into(),
            output_format,
            expected_cardinality,
            user_output_type,
            language,
        }
    }
}

/// Server-assigned input/output descriptor id pair, as returned by
/// `Parse`/`Prepare` (§4.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdPair {
    pub input: Uuid,
    pub output: Uuid,
}

/// A server type-id paired with the user-side Rust type it should decode
/// into; the key of the per-connection out-codec cache (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken {
    pub type_id: Uuid,
    pub user_type: TypeId,
}
