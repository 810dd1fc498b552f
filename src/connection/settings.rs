//! Server settings map, fed by `ParameterStatus` (§3, §4.7).
//!
//! Grounded on the teacher's `ServerParameters` (a last-write-wins string
//! map warm-started for known defaults), kept per-connection rather than as
//! a process-wide singleton: each protocol connection here dials its own
//! backend and tracks its own settings independently.

use std::collections::HashMap;

use bytes::Bytes;

/// Named constant the pool looks for when inferring default concurrency.
pub const SUGGESTED_POOL_CONCURRENCY_KEY: &str = "suggested_pool_concurrency";

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    params: HashMap<String, Bytes>,
}

impl ServerSettings {
    pub fn new() -> Self {
        Self {
            params: HashMap::new(),
        }
    }

    /// Last-write-wins update from a `ParameterStatus` message.
    pub fn set_param(&mut self, name: String, value: Bytes) {
        self.params.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.params.get(name)
    }

    pub fn as_map(&self) -> &HashMap<String, Bytes> {
        &self.params
    }
}

/// Parses `suggested_pool_concurrency` out of a settings map, per the
/// supplemented-features note in §1. Lives here (not in the pool module) so
/// it is testable against a bare `ServerSettings` without constructing a
/// pool.
pub fn suggested_concurrency(settings: &ServerSettings) -> Option<usize> {
    let raw = settings.get(SUGGESTED_POOL_CONCURRENCY_KEY)?;
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut s = ServerSettings::new();
        s.set_param("a".into(), Bytes::from_static(b"1"));
        s.set_param("a".into(), Bytes::from_static(b"2"));
        assert_eq!(s.get("a"), Some(&Bytes::from_static(b"2")));
    }

    #[test]
    fn parses_suggested_concurrency() {
        let mut s = ServerSettings::new();
        s.set_param(
            SUGGESTED_POOL_CONCURRENCY_KEY.into(),
            Bytes::from_static(b"7"),
        );
        assert_eq!(suggested_concurrency(&s), Some(7));
    }

    #[test]
    fn missing_key_yields_none() {
        let s = ServerSettings::new();
        assert_eq!(suggested_concurrency(&s), None);
    }
}
