//! Transactable connection (C9, §4.9): applies the retry policy on top of
//! the reconnecting connection. Read-only queries retry individually;
//! `Tx` blocks retry as a whole unit.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::{CodecCaches, QueryKey};
use crate::codec::CodecBuilder;
use crate::context::Context;
use crate::errors::{classify, Error};
use crate::flow::{self, Query, QueryResult};
use crate::ops;
use crate::reconnect::Reconnecting;
use crate::retry::RetryPolicy;
use crate::transaction::{self, TransactOptions, Transaction};

/// Wraps [`Reconnecting`] with retry semantics (§4.9).
pub struct Transactable {
    reconnecting: Reconnecting,
    caches: Arc<CodecCaches>,
    builder: Arc<dyn CodecBuilder>,
    policy: RetryPolicy,
}

impl Transactable {
    pub fn new(reconnecting: Reconnecting, caches: Arc<CodecCaches>, builder: Arc<dyn CodecBuilder>) -> Self {
        Self {
            reconnecting,
            caches,
            builder,
            policy: RetryPolicy::default(),
        }
    }

    pub fn server(&self) -> &crate::errors::ServerIdentifier {
        self.reconnecting.server()
    }

    pub fn settings(&self) -> &crate::connection::ServerSettings {
        &self.reconnecting.io().settings
    }

    /// Terminates the underlying connection. Used by the pool (C10) when a
    /// connection is not fit to return to the free slot.
    pub async fn close(self) {
        self.reconnecting.into_io().close().await;
    }

    /// True if the cache already knows this exact query never asks for
    /// transaction-scoped capabilities, i.e. it's safe to retry on its own
    /// rather than only as part of a `Tx` (§4.9, §7).
    fn is_known_read_only(&self, query: &Query<'_>) -> bool {
        let key = QueryKey::new(
            query.command,
            query.format,
            query.expected_cardinality,
            query.user_output_type,
            query.language,
        );
        self.caches.get_capabilities(&key) == Some(0)
    }

    async fn run_with_retry(&mut self, ctx: &Context, query: &Query<'_>) -> Result<QueryResult, Error> {
        let mut attempt = 1;
        loop {
            let caches = self.caches.clone();
            let builder = self.builder.clone();
            let result = self
                .reconnecting
                .run(move |io| -> crate::reconnect::BoxedOp<'_, QueryResult> {
                    Box::pin(flow::run(io, ctx, &caches, &*builder, query))
                })
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if matches!(err, Error::Cancelled) {
                        return Err(err);
                    }
                    let eligible = self.is_known_read_only(query) && classify(&err, false).should_retry();
                    if !eligible || !self.policy.should_retry(attempt) {
                        return Err(err);
                    }
                    log::warn!("retrying read-only query (attempt {attempt}): {err}");
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn execute(&mut self, ctx: &Context, command: &str, args: &dyn Any) -> Result<(), Error> {
        let query = ops::execute_shape(command, args, false);
        self.run_with_retry(ctx, &query).await?;
        Ok(())
    }

    pub async fn query<T: 'static + Send>(
        &mut self,
        ctx: &Context,
        command: &str,
        args: &dyn Any,
    ) -> Result<Vec<T>, Error> {
        let query = ops::query_shape::<T>(command, args, false);
        let result = self.run_with_retry(ctx, &query).await?;
        ops::downcast_rows(result)
    }

    pub async fn query_single<T: 'static + Send>(
        &mut self,
        ctx: &Context,
        command: &str,
        args: &dyn Any,
    ) -> Result<Option<T>, Error> {
        let query = ops::query_single_shape::<T>(command, args, false);
        let result = self.run_with_retry(ctx, &query).await;
        ops::single_or_none(result)
    }

    pub async fn query_json(&mut self, ctx: &Context, command: &str, args: &dyn Any) -> Result<Vec<Bytes>, Error> {
        let query = ops::query_json_shape(command, args, false);
        let result = self.run_with_retry(ctx, &query).await?;
        ops::downcast_rows(result)
    }

    pub async fn query_single_json(
        &mut self,
        ctx: &Context,
        command: &str,
        args: &dyn Any,
    ) -> Result<Option<Bytes>, Error> {
        let query = ops::query_single_json_shape(command, args, false);
        let result = self.run_with_retry(ctx, &query).await;
        ops::single_or_none(result)
    }

    /// Runs `body` as a transaction, retrying the whole `START
    /// TRANSACTION`/body/`COMMIT-or-ROLLBACK` unit on a retry-eligible
    /// failure (§4.9). A cancellation mid-transaction is never retried: the
    /// connection may be left mid-round-trip, so it's handed back to the
    /// pool as an error instead (§5).
    pub async fn tx<T, F, Fut>(&mut self, ctx: &Context, body: F) -> Result<T, Error>
    where
        F: Fn(&mut Transaction<'_>) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;
        loop {
            let io = self.reconnecting.io_mut();
            let result =
                transaction::run_once(io, *ctx, &self.caches, &*self.builder, TransactOptions::default(), &body).await;
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if matches!(err, Error::Cancelled) || !classify(&err, false).should_retry() || !self.policy.should_retry(attempt) {
                        return Err(err);
                    }
                    log::warn!("retrying transaction (attempt {attempt}): {err}");
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
