//! Monotonic clock helper.
//!
//! The teacher wraps `quanta::Clock` behind a `once_cell::sync::Lazy`
//! global for hot-path timing (`utils::clock::CLOCK`). This core has no
//! comparable per-row hot path to justify a TSC-backed clock, so the same
//! `Lazy` shape wraps `std::time::Instant` instead — callers measuring
//! elapsed time against a `std::time::Instant` (e.g. `reconnect.rs`'s
//! dial-retry backoff) go through this one `now()` rather than calling
//! `Instant::now()` directly. `context.rs`'s deadline math uses
//! `tokio::time::Instant` instead, since `tokio::time::timeout_at` requires
//! that specific type — a distinct clock, not an oversight.

use std::time::Instant;

/// Returns the current instant. A thin wrapper kept for call-site parity
/// with the teacher's `clock::now()`; `std::time::Instant::now()` already
/// has negligible overhead so no caching is needed.
#[inline]
pub fn now() -> Instant {
    Instant::now()
}
