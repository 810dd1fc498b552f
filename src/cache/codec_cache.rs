//! Per-pool codec caches (C5): shared by every connection in a pool so a
//! first connection warming the cache accelerates every sibling.
//!
//! Grounded directly on the teacher's
//! `server::prepared_statement_cache::PreparedStatementCache`: a `DashMap`
//! for lock-free reads plus an approximate LRU via a monotonic counter
//! (fast path `get_mut` bumps the counter in place, slow path evicts the
//! globally-oldest entry by scanning counters). Four independent maps
//! rather than one, since each has its own key/value shape (§4.4).

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::warn;
use uuid::Uuid;

use super::query_key::{IdPair, QueryKey, TypeToken};
use crate::codec::{Decoder, Encoder};
use crate::protocol::ProtocolVersion;

struct Entry<V> {
    value: V,
    count_used: u64,
}

/// A DashMap-backed cache with approximate-LRU eviction by a global
/// monotonic counter, generic over key/value so the four caches below don't
/// repeat the eviction logic four times.
struct ApproxLru<K, V> {
    map: DashMap<K, Entry<V>>,
    max_size: usize,
    counter: AtomicU64,
}

impl<K, V> ApproxLru<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn new(max_size: usize) -> Self {
        Self {
            map: DashMap::with_capacity(max_size.max(1)),
            max_size: max_size.max(1),
            counter: AtomicU64::new(0),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let timestamp = self.counter.fetch_add(1, Ordering::Relaxed);
        if let Some(mut entry) = self.map.get_mut(key) {
            entry.count_used = timestamp;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn insert(&self, key: K, value: V) {
        if self.map.len() >= self.max_size && !self.map.contains_key(&key) {
            self.evict_oldest();
        }
        let timestamp = self.counter.fetch_add(1, Ordering::Relaxed);
        self.map.insert(
            key,
            Entry {
                value,
                count_used: timestamp,
            },
        );
    }

    fn remove(&self, key: &K) {
        self.map.remove(key);
    }

    fn evict_oldest(&self) {
        let mut oldest_key: Option<K> = None;
        let mut oldest_time = u64::MAX;
        for entry in self.map.iter() {
            if entry.count_used < oldest_time {
                oldest_time = entry.count_used;
                oldest_key = Some(entry.key().clone());
            }
        }
        if let Some(key) = oldest_key {
            self.map.remove(&key);
            warn!("evicted codec cache entry");
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// A version-tagged codec: cached entries from a stale protocol build are
/// discarded rather than reused (§4.4 invariant).
struct Versioned<T: ?Sized> {
    codec: Arc<T>,
    built_with: ProtocolVersion,
}

/// The four per-pool caches described by §4.4, held together behind one
/// handle so pools only need to thread a single `Arc<CodecCaches>` through
/// connections.
pub struct CodecCaches {
    in_codecs: ApproxLru<Uuid, Versioned<dyn Encoder>>,
    out_codecs: ApproxLru<TypeToken, Versioned<dyn Decoder>>,
    type_ids: ApproxLru<QueryKey, IdPair>,
    capabilities: ApproxLru<QueryKey, u64>,
}

impl<T: ?Sized> Clone for Versioned<T> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            built_with: self.built_with,
        }
    }
}

impl CodecCaches {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_codecs: ApproxLru::new(capacity),
            out_codecs: ApproxLru::new(capacity),
            type_ids: ApproxLru::new(capacity),
            capabilities: ApproxLru::new(capacity),
        }
    }

    pub fn get_encoder(&self, type_id: Uuid, version: ProtocolVersion) -> Option<Arc<dyn Encoder>> {
        self.in_codecs.get(&type_id).and_then(|v| {
            if v.built_with == version {
                Some(v.codec)
            } else {
                self.in_codecs.remove(&type_id);
                None
            }
        })
    }

    pub fn put_encoder(&self, type_id: Uuid, codec: Arc<dyn Encoder>, version: ProtocolVersion) {
        self.in_codecs.insert(
            type_id,
            Versioned {
                codec,
                built_with: version,
            },
        );
    }

    pub fn get_decoder(
        &self,
        type_id: Uuid,
        user_type: TypeId,
        version: ProtocolVersion,
    ) -> Option<Arc<dyn Decoder>> {
        let token = TypeToken { type_id, user_type };
        self.out_codecs.get(&token).and_then(|v| {
            if v.built_with == version {
                Some(v.codec)
            } else {
                self.out_codecs.remove(&token);
                None
            }
        })
    }

    pub fn put_decoder(
        &self,
        type_id: Uuid,
        user_type: TypeId,
        codec: Arc<dyn Decoder>,
        version: ProtocolVersion,
    ) {
        self.out_codecs.insert(
            TypeToken { type_id, user_type },
            Versioned {
                codec,
                built_with: version,
            },
        );
    }

    pub fn get_ids(&self, key: &QueryKey) -> Option<IdPair> {
        self.type_ids.get(key)
    }

    pub fn put_ids(&self, key: QueryKey, ids: IdPair) {
        self.type_ids.insert(key, ids);
    }

    pub fn get_capabilities(&self, key: &QueryKey) -> Option<u64> {
        self.capabilities.get(key)
    }

    pub fn put_capabilities(&self, key: QueryKey, caps: u64) {
        self.capabilities.insert(key, caps);
    }

    /// Total entry count across all four caches; diagnostics only.
    pub fn len(&self) -> usize {
        self.in_codecs.len() + self.out_codecs.len() + self.type_ids.len() + self.capabilities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonBytesDecoder;
    use crate::protocol::{Cardinality, IoFormat, Language};
    use std::any::TypeId;

    #[test]
    fn ids_cache_round_trips() {
        let caches = CodecCaches::new(4);
        let key = QueryKey::new(
            "select 1",
            IoFormat::Json,
            Cardinality::One,
            TypeId::of::<()>(),
            Language::EdgeQL,
        );
        assert!(caches.get_ids(&key).is_none());
        let ids = IdPair {
            input: Uuid::new_v4(),
            output: Uuid::new_v4(),
        };
        caches.put_ids(key.clone(), ids);
        assert_eq!(caches.get_ids(&key), Some(ids));
    }

    #[test]
    fn stale_protocol_version_is_discarded_on_lookup() {
        let caches = CodecCaches::new(4);
        let type_id = Uuid::new_v4();
        let user_type = TypeId::of::<bytes::Bytes>();
        let decoder: Arc<dyn Decoder> = Arc::new(JsonBytesDecoder);
        caches.put_decoder(type_id, user_type, decoder, ProtocolVersion::new(1, 0));
        assert!(caches
            .get_decoder(type_id, user_type, ProtocolVersion::new(2, 0))
            .is_none());
        assert!(caches
            .get_decoder(type_id, user_type, ProtocolVersion::new(1, 0))
            .is_none()); // evicted by the mismatched lookup above
    }

    #[test]
    fn eviction_drops_the_globally_oldest_entry() {
        let caches = CodecCaches::new(2);
        let k1 = QueryKey::new("a", IoFormat::Binary, Cardinality::Many, TypeId::of::<()>(), Language::EdgeQL);
        let k2 = QueryKey::new("b", IoFormat::Binary, Cardinality::Many, TypeId::of::<()>(), Language::EdgeQL);
        let k3 = QueryKey::new("c", IoFormat::Binary, Cardinality::Many, TypeId::of::<()>(), Language::EdgeQL);
        caches.put_ids(k1.clone(), IdPair { input: Uuid::new_v4(), output: Uuid::new_v4() });
        caches.put_ids(k2.clone(), IdPair { input: Uuid::new_v4(), output: Uuid::new_v4() });
        caches.put_ids(k3.clone(), IdPair { input: Uuid::new_v4(), output: Uuid::new_v4() });
        assert!(caches.get_ids(&k1).is_none());
        assert!(caches.get_ids(&k2).is_some());
        assert!(caches.get_ids(&k3).is_some());
    }
}
