//! Process-wide descriptor cache (C4).
//!
//! The one deliberately global, process-wide mutable cache in the system:
//! descriptor bodies are content-addressed by server-assigned type ids, so
//! sharing them across every pool and connection in the process is both
//! safe and free of staleness concerns. Grounded on the teacher's
//! `once_cell::sync::Lazy` singleton pattern (`utils::clock::CLOCK`)
//! combined with a bounded `lru::LruCache`, the way
//! `server::prepared_statement_cache` combines `once_cell` with a bounded
//! cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 1000;

static DESCRIPTORS: Lazy<Mutex<LruCache<Uuid, Arc<[u8]>>>> =
    Lazy::new(|| Mutex::new(LruCache::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap())));

/// Looks up a previously-cached descriptor body by its server type id.
pub fn get(type_id: Uuid) -> Option<Arc<[u8]>> {
    DESCRIPTORS.lock().get(&type_id).cloned()
}

/// Inserts or replaces the descriptor body for `type_id`. A put always
/// replaces the whole value; callers never mutate a cached entry in place.
pub fn put(type_id: Uuid, descriptor: Arc<[u8]>) {
    DESCRIPTORS.lock().put(type_id, descriptor);
}

/// Current entry count. Exposed for tests and diagnostics only.
pub fn len() -> usize {
    DESCRIPTORS.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let id = Uuid::new_v4();
        let body: Arc<[u8]> = Arc::from(&b"descriptor bytes"[..]);
        put(id, body.clone());
        assert_eq!(get(id).as_deref(), Some(&body[..]));
    }

    #[test]
    fn unknown_id_misses() {
        assert_eq!(get(Uuid::new_v4()), None);
    }
}
