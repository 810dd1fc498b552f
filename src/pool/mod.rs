//! Connection pool (C10, §4.10).
//!
//! Grounded on the teacher's `pool::inner::Pool`: a `tokio::sync::Semaphore`
//! bounding concurrency and a `parking_lot::Mutex`-guarded slot admitting
//! either a cached connection or a fresh dial. The split here differs from
//! the teacher's "semaphore = max_size, always present" in one way: a
//! `potential` permit means "not yet dialed" rather than "an existing
//! connection is free", so `acquire` has two distinct fast paths (pop the
//! free slot, or win a permit and dial) instead of one.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell, Semaphore};

use crate::cache::CodecCaches;
use crate::codec::CodecBuilder;
use crate::config::ConnectConfig;
use crate::connection::settings::suggested_concurrency;
use crate::context::Context;
use crate::errors::{Error, WrappedErrors};
use crate::protocol::ProtocolVersion;
use crate::reconnect::Reconnecting;
use crate::transaction::Transaction;
use crate::transactable::Transactable;

/// Per-entry/result codec cache capacity (§4.4). Not exposed as a knob: the
/// teacher's equivalent cache sizes are fixed constants too.
const CODEC_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connect: ConnectConfig,
    /// `None` defers to `suggested_pool_concurrency`, then `max(4, cpus)`.
    pub concurrency: Option<usize>,
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
}

struct Inner {
    config: PoolConfig,
    caches: Arc<CodecCaches>,
    builder: Arc<dyn CodecBuilder>,
    closed: AtomicBool,
    /// Single free slot: the spec's note that `free`'s capacity is "1 slot
    /// in some variants" is taken literally here rather than as an unbounded
    /// deque, since nothing in §4.10 needs more than one cached idle
    /// connection waiting between callers.
    free: Mutex<Option<Transactable>>,
    free_notify: Notify,
    /// Filled in by whichever `acquire` call first races the bootstrap dial
    /// (see `Inner::bootstrap`); consumed by that same caller.
    bootstrap_conn: Mutex<Option<Transactable>>,
    semaphore: OnceCell<Semaphore>,
}

/// Bounded set of transactable connections with admission control (C10).
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    pub fn new(config: PoolConfig, builder: Arc<dyn CodecBuilder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                caches: Arc::new(CodecCaches::new(CODEC_CACHE_CAPACITY)),
                builder,
                closed: AtomicBool::new(false),
                free: Mutex::new(None),
                free_notify: Notify::new(),
                bootstrap_conn: Mutex::new(None),
                semaphore: OnceCell::new(),
            }),
        }
    }

    async fn dial(&self) -> Result<Transactable, Error> {
        let reconnecting = Reconnecting::connect(
            self.inner.config.connect.clone(),
            self.inner.config.min_version,
            self.inner.config.max_version,
        )
        .await?;
        Ok(Transactable::new(reconnecting, self.inner.caches.clone(), self.inner.builder.clone()))
    }

    /// Ensures the semaphore exists, dialing the first connection
    /// synchronously to learn `suggested_pool_concurrency` if the caller
    /// didn't pin a concurrency level (§4.10 steps 1-3). Returns `Some` only
    /// to the one caller that actually performed the dial.
    async fn bootstrap(&self) -> Result<Option<Transactable>, Error> {
        self.inner
            .semaphore
            .get_or_try_init(|| async {
                let conn = self.dial().await?;
                let concurrency = self
                    .inner
                    .config
                    .concurrency
                    .or_else(|| suggested_concurrency(conn.settings()))
                    .unwrap_or_else(|| num_cpus::get().max(4));
                log::debug!("pool bootstrapped with concurrency {concurrency}");
                *self.inner.bootstrap_conn.lock() = Some(conn);
                Ok::<_, Error>(Semaphore::new(concurrency.saturating_sub(1)))
            })
            .await?;
        Ok(self.inner.bootstrap_conn.lock().take())
    }

    async fn acquire_inner(&self) -> Result<Transactable, Error> {
        if let Some(first) = self.bootstrap().await? {
            log::debug!("pool acquire: handed out the bootstrap connection");
            return Ok(first);
        }
        loop {
            if let Some(conn) = self.inner.free.lock().take() {
                log::debug!("pool acquire: reused a free connection");
                return Ok(conn);
            }
            let semaphore = self
                .inner
                .semaphore
                .get()
                .expect("bootstrap() always initializes the semaphore before returning");
            tokio::select! {
                biased;
                _ = self.inner.free_notify.notified() => continue,
                permit = semaphore.acquire() => {
                    let permit = permit.expect("semaphore is never explicitly closed");
                    match self.dial().await {
                        Ok(conn) => {
                            permit.forget();
                            log::debug!("pool acquire: dialed a new connection");
                            return Ok(conn);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Checks out a connection (§4.10). `ctx` bounds how long the caller is
    /// willing to wait for one to become available.
    pub async fn acquire(&self, ctx: &Context) -> Result<Transactable, Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Interface("pool is closed"));
        }
        if ctx.is_expired() {
            return Err(Error::Cancelled);
        }
        ctx.race(self.acquire_inner()).await?
    }

    /// Returns a connection to the pool, closing it instead if `err`
    /// indicates it's no longer sound to reuse, or if the pool has since
    /// been closed (§4.10).
    pub async fn release(&self, conn: Transactable, err: Option<&Error>) {
        // A cancellation may have abandoned the connection mid-round-trip
        // (§5: "poisoned and closed"), so it's never handed back to the free
        // slot alongside the usual closed-pool/client-connection cases.
        let must_close = self.inner.closed.load(Ordering::Acquire)
            || err.is_some_and(|e| matches!(e, Error::ClientConnection(_) | Error::Cancelled));

        if must_close {
            log::debug!("pool release: closing connection");
            conn.close().await;
            if let Some(semaphore) = self.inner.semaphore.get() {
                semaphore.add_permits(1);
            }
            return;
        }

        let mut slot = self.inner.free.lock();
        if slot.is_some() {
            drop(slot);
            log::debug!("pool release: free slot occupied, closing connection instead");
            conn.close().await;
            if let Some(semaphore) = self.inner.semaphore.get() {
                semaphore.add_permits(1);
            }
        } else {
            *slot = Some(conn);
            drop(slot);
            self.inner.free_notify.notify_one();
        }
    }

    /// Flips the closed flag and drains the free slot. Connections checked
    /// out at the moment of closing are terminated by their own `release`
    /// call once the caller returns them, since `closed` is now visible.
    pub async fn close(&self) -> Result<(), WrappedErrors> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::debug!("pool closing");
        // Closing an already-idle `Io` is infallible here (best-effort
        // `Terminate`, see `Io::close`), so there is nothing to aggregate
        // for the slots drained below; `WrappedErrors` exists for parity
        // with a future transport where close can fail.
        let errors = WrappedErrors::new();
        if let Some(conn) = self.inner.free.lock().take() {
            conn.close().await;
        }
        if let Some(conn) = self.inner.bootstrap_conn.lock().take() {
            conn.close().await;
        }
        self.inner.free_notify.notify_waiters();
        errors.into_result()
    }

    pub async fn execute(&self, ctx: &Context, command: &str, args: &dyn Any) -> Result<(), Error> {
        let mut conn = self.acquire(ctx).await?;
        let result = conn.execute(ctx, command, args).await;
        self.release(conn, result.as_ref().err()).await;
        result
    }

    pub async fn query<T: 'static + Send>(
        &self,
        ctx: &Context,
        command: &str,
        args: &dyn Any,
    ) -> Result<Vec<T>, Error> {
        let mut conn = self.acquire(ctx).await?;
        let result = conn.query::<T>(ctx, command, args).await;
        self.release(conn, result.as_ref().err()).await;
        result
    }

    pub async fn query_single<T: 'static + Send>(
        &self,
        ctx: &Context,
        command: &str,
        args: &dyn Any,
    ) -> Result<Option<T>, Error> {
        let mut conn = self.acquire(ctx).await?;
        let result = conn.query_single::<T>(ctx, command, args).await;
        self.release(conn, result.as_ref().err()).await;
        result
    }

    pub async fn query_json(&self, ctx: &Context, command: &str, args: &dyn Any) -> Result<Vec<Bytes>, Error> {
        let mut conn = self.acquire(ctx).await?;
        let result = conn.query_json(ctx, command, args).await;
        self.release(conn, result.as_ref().err()).await;
        result
    }

    pub async fn query_single_json(
        &self,
        ctx: &Context,
        command: &str,
        args: &dyn Any,
    ) -> Result<Option<Bytes>, Error> {
        let mut conn = self.acquire(ctx).await?;
        let result = conn.query_single_json(ctx, command, args).await;
        self.release(conn, result.as_ref().err()).await;
        result
    }

    /// Runs `body` as a transaction on a checked-out connection (§6, §4.11).
    pub async fn tx<T, F, Fut>(&self, ctx: &Context, body: F) -> Result<T, Error>
    where
        F: Fn(&mut Transaction<'_>) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut conn = self.acquire(ctx).await?;
        let result = conn.tx(ctx, body).await;
        self.release(conn, result.as_ref().err()).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServerSettings;

    #[test]
    fn pool_config_is_clone() {
        let cfg = PoolConfig {
            connect: ConnectConfig::new("localhost", 5656, "edgedb", "edgedb"),
            concurrency: Some(4),
            min_version: ProtocolVersion { major: 2, minor: 0 },
            max_version: ProtocolVersion { major: 2, minor: 0 },
        };
        let cloned = cfg.clone();
        assert_eq!(cloned.concurrency, Some(4));
    }

    #[test]
    fn settings_fallback_is_independent_of_pool() {
        // suggested_concurrency is exercised directly in connection::settings;
        // this just confirms the helper is reachable from here too.
        let settings = ServerSettings::new();
        assert_eq!(suggested_concurrency(&settings), None);
    }
}
