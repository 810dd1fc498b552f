//! Transaction & sub-transaction (C11, §4.11).
//!
//! A `Transaction` exclusively borrows its connection's `BorrowState` for
//! its lifetime; `subtx` upgrades that borrow to `Subtransaction` and back,
//! mirroring the teacher's pattern of a typed guard object that only the
//! holder can drive further (there: `pool::Object`; here: the borrow flag
//! itself, since the connection isn't returned to a pool mid-transaction).

use std::any::Any;

use bytes::Bytes;

use crate::cache::CodecCaches;
use crate::codec::CodecBuilder;
use crate::connection::{BorrowState, Io};
use crate::context::Context;
use crate::errors::Error;
use crate::flow;
use crate::ops;

/// Isolation level accepted by `START TRANSACTION` (§4.11 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for `START TRANSACTION`. Defaults match §4.11: repeatable-read,
/// read-write, not deferrable.
#[derive(Debug, Clone, Copy)]
pub struct TransactOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
}

impl Default for TransactOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::RepeatableRead,
            read_only: false,
            deferrable: false,
        }
    }
}

impl TransactOptions {
    fn start_statement(&self) -> String {
        format!(
            "START TRANSACTION ISOLATION {}, {}, {}",
            self.isolation.as_sql(),
            if self.read_only { "READ ONLY" } else { "READ WRITE" },
            if self.deferrable { "DEFERRABLE" } else { "NOT DEFERRABLE" },
        )
    }
}

/// A started transaction, exclusively borrowing `io` (§4.11). Dropping this
/// without calling `commit`/`rollback` leaves the connection borrowed —
/// callers are expected to always resolve through one or the other, which
/// is why both consume `self`.
pub struct Transaction<'io> {
    io: &'io mut Io,
    ctx: Context,
    caches: &'io CodecCaches,
    builder: &'io dyn CodecBuilder,
    savepoint_counter: u32,
    borrow: BorrowState,
}

impl<'io> Transaction<'io> {
    pub(crate) async fn start(
        io: &'io mut Io,
        ctx: Context,
        caches: &'io CodecCaches,
        builder: &'io dyn CodecBuilder,
        opts: TransactOptions,
    ) -> Result<Transaction<'io>, Error> {
        // `io` arrives as an exclusive `&mut` borrow, so the type system
        // already rules out a second live transaction on it; `BorrowState`
        // only needs to track the transaction/sub-transaction distinction
        // from here on.
        let borrow = BorrowState::Unborrowed
            .borrow_for_transaction()
            .expect("fresh transaction always starts unborrowed");

        let stmt = opts.start_statement();
        let query = ops::execute_shape(&stmt, &(), true);
        flow::run(io, &ctx, caches, builder, &query).await?;

        Ok(Self {
            io,
            ctx,
            caches,
            builder,
            savepoint_counter: 0,
            borrow,
        })
    }

    fn assert_unborrowed_ok(&self) -> Result<(), Error> {
        // A live `sub` handle also carries `Transaction`/`Subtransaction`
        // borrow; the type system (an exclusive `&mut self` for the
        // duration of `body(&mut sub)`) already rules out a second live
        // handle touching the same connection, so this only needs to
        // reject the fully-released state.
        if matches!(self.borrow, BorrowState::Unborrowed) {
            Err(Error::Interface("transaction is no longer active"))
        } else {
            Ok(())
        }
    }

    pub async fn execute(&mut self, command: &str, args: &dyn Any) -> Result<(), Error> {
        self.assert_unborrowed_ok()?;
        let query = ops::execute_shape(command, args, true);
        flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await?;
        Ok(())
    }

    pub async fn query<T: 'static + Send>(&mut self, command: &str, args: &dyn Any) -> Result<Vec<T>, Error> {
        self.assert_unborrowed_ok()?;
        let query = ops::query_shape::<T>(command, args, true);
        let result = flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await?;
        ops::downcast_rows(result)
    }

    pub async fn query_single<T: 'static + Send>(
        &mut self,
        command: &str,
        args: &dyn Any,
    ) -> Result<Option<T>, Error> {
        self.assert_unborrowed_ok()?;
        let query = ops::query_single_shape::<T>(command, args, true);
        let result = flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await;
        ops::single_or_none(result)
    }

    pub async fn query_json(&mut self, command: &str, args: &dyn Any) -> Result<Vec<Bytes>, Error> {
        self.assert_unborrowed_ok()?;
        let query = ops::query_json_shape(command, args, true);
        let result = flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await?;
        ops::downcast_rows(result)
    }

    pub async fn query_single_json(&mut self, command: &str, args: &dyn Any) -> Result<Option<Bytes>, Error> {
        self.assert_unborrowed_ok()?;
        let query = ops::query_single_json_shape(command, args, true);
        let result = flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await;
        ops::single_or_none(result)
    }

    /// Runs `body` against a sub-transaction (savepoint). On success,
    /// releases the savepoint; on failure, rolls back to it and propagates
    /// the error (§4.11).
    pub async fn subtx<T, F, Fut>(&mut self, body: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Transaction<'_>) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let outer_borrow = self
            .borrow
            .enter_subtransaction()
            .ok_or(Error::Interface("cannot enter a nested sub-transaction directly"))?;

        self.savepoint_counter += 1;
        let name = format!("savepoint_{}", self.savepoint_counter);

        let declare = ops::execute_shape(&format!("DECLARE SAVEPOINT {name}"), &(), true);
        flow::run(self.io, &self.ctx, self.caches, self.builder, &declare).await?;

        let mut sub = Transaction {
            io: self.io,
            ctx: self.ctx,
            caches: self.caches,
            builder: self.builder,
            savepoint_counter: self.savepoint_counter,
            borrow: outer_borrow,
        };
        let outcome = body(&mut sub).await;
        self.savepoint_counter = sub.savepoint_counter;
        self.borrow = sub
            .borrow
            .exit_subtransaction()
            .ok_or(Error::Interface("sub-transaction left in an inconsistent borrow state"))?;

        match outcome {
            Ok(value) => {
                let release = ops::execute_shape(&format!("RELEASE SAVEPOINT {name}"), &(), true);
                flow::run(self.io, &self.ctx, self.caches, self.builder, &release).await?;
                Ok(value)
            }
            Err(err) => {
                let rollback = ops::execute_shape(&format!("ROLLBACK TO SAVEPOINT {name}"), &(), true);
                flow::run(self.io, &self.ctx, self.caches, self.builder, &rollback).await?;
                Err(err)
            }
        }
    }

    pub(crate) async fn commit(self) -> Result<(), Error> {
        let query = ops::execute_shape("COMMIT", &(), true);
        flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await?;
        Ok(())
    }

    pub(crate) async fn rollback(self) -> Result<(), Error> {
        let query = ops::execute_shape("ROLLBACK", &(), true);
        flow::run(self.io, &self.ctx, self.caches, self.builder, &query).await?;
        Ok(())
    }
}

/// Runs `body` as one `START TRANSACTION` / closure / `COMMIT`-or-`ROLLBACK`
/// unit (§4.11 step 3). Retrying this whole unit on conflict is C9's job
/// ([`crate::transactable::Transactable::tx`]), not this function's.
pub(crate) async fn run_once<T, F, Fut>(
    io: &mut Io,
    ctx: Context,
    caches: &CodecCaches,
    builder: &dyn CodecBuilder,
    opts: TransactOptions,
    body: F,
) -> Result<T, Error>
where
    F: FnOnce(&mut Transaction<'_>) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut tx = Transaction::start(io, ctx, caches, builder, opts).await?;
    match body(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tx.rollback().await?;
            Err(err)
        }
    }
}
