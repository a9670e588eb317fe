//! Transaction Coordinator
//!
//! Runs caller logic inside one primary-bound transaction and commits or rolls
//! back depending on its result:
//! - callback `Ok` → commit
//! - callback `Err` → rollback, report the callback error
//! - context fired → rollback, report the interruption
//!
//! Transactions on one [`Router`] are serialized by an async mutex held from
//! begin to commit/rollback.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::context::Context;
use crate::error::{DbError, TxError};
use crate::pool::{DbPool, DbTransaction, ExecResult, TxOptions};
use crate::router::Router;
use crate::statement::{IntoStatement, Mutation, Query};
use crate::value::Value;

/// Transaction-scoped handle passed to the callback.
///
/// Offers the same `query` / `query_row` / `exec` surface as the router, with the
/// same statement checks, but every call runs inside the transaction. Clones share
/// the transaction. Once the coordinator has committed or rolled back, every call
/// on a leftover clone fails with [`DbError::TxDone`].
pub struct Tx<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: DbTransaction> Tx<T> {
    fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn query(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
        args: &[Value],
    ) -> Result<Vec<T::Row>, DbError> {
        let stmt = stmt.into_statement()?;
        tracing::debug!(sqlsplit.sql = %stmt, "Transactional query");
        let mut tx = self.inner.lock().await;
        ctx.run(tx.query(stmt.as_str(), args)).await
    }

    pub async fn query_row(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
        args: &[Value],
    ) -> Result<T::Row, DbError> {
        let stmt = stmt.into_statement()?;
        tracing::debug!(sqlsplit.sql = %stmt, "Transactional query");
        let mut tx = self.inner.lock().await;
        ctx.run(tx.query_row(stmt.as_str(), args)).await
    }

    pub async fn exec(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Mutation>,
        args: &[Value],
    ) -> Result<ExecResult, DbError> {
        let stmt = stmt.into_statement()?;
        tracing::debug!(sqlsplit.sql = %stmt, "Transactional mutation");
        let mut tx = self.inner.lock().await;
        ctx.run(tx.exec(stmt.as_str(), args)).await
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.inner.lock().await.commit().await
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.inner.lock().await.rollback().await
    }
}

impl<P: DbPool> Router<P> {
    /// Runs `f` in one transaction on the primary.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or when `ctx`
    /// fires first. At most one transaction runs at a time on this router; a second
    /// call waits until the first has committed or rolled back.
    ///
    /// Only calls made through the [`Tx`] handle belong to the transaction. Calls made
    /// through the router itself from inside `f` run immediately, outside the
    /// transaction, on whichever connection the router would pick for them, and
    /// are not undone by a rollback.
    ///
    /// ```rust,ignore
    /// router
    ///     .run_in_transaction(&ctx, |tx| async move {
    ///         tx.exec(&ctx, "INSERT INTO items(id, name) VALUES(?, ?)", &args!["1", "a"]).await?;
    ///         tx.exec(&ctx, "UPDATE stock SET count = count - 1", &[]).await?;
    ///         Ok::<_, DbError>(())
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_in_transaction<R, E, F, Fut>(
        &self,
        ctx: &Context,
        f: F,
    ) -> Result<R, TxError<E>>
    where
        F: FnOnce(Tx<P::Transaction>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
    {
        self.run_in_transaction_with(ctx, TxOptions::default(), f)
            .await
    }

    /// [`run_in_transaction`](Self::run_in_transaction) with explicit isolation level
    /// and access mode.
    pub async fn run_in_transaction_with<R, E, F, Fut>(
        &self,
        ctx: &Context,
        options: TxOptions,
        f: F,
    ) -> Result<R, TxError<E>>
    where
        F: FnOnce(Tx<P::Transaction>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
    {
        let _guard = ctx
            .run(async { Ok(self.tx_lock.lock().await) })
            .await
            .map_err(TxError::Begin)?;

        let inner = ctx
            .run(self.connections().primary().begin(&options))
            .await
            .map_err(TxError::Begin)?;
        tracing::debug!(?options, "Transaction started");
        let tx = Tx::new(inner);

        let outcome = ctx.run(async { Ok(f(tx.clone()).await) }).await;

        match outcome {
            Ok(Ok(value)) => match ctx.run(tx.commit()).await {
                Ok(()) => {
                    tracing::debug!("Transaction committed");
                    Ok(value)
                }
                Err(cause) if cause.is_interrupted() => Err(interrupted(&tx, cause).await),
                Err(cause) => Err(TxError::Commit(cause)),
            },
            Ok(Err(cause)) => match tx.rollback().await {
                Ok(()) => {
                    tracing::debug!(%cause, "Transaction rolled back");
                    Err(TxError::Callback(cause))
                }
                Err(rollback) if rollback.is_tx_done() => {
                    tracing::debug!(%cause, "Transaction already finished before rollback");
                    Err(TxError::Callback(cause))
                }
                Err(rollback) => {
                    tracing::warn!(%cause, %rollback, "Failed to rollback transaction");
                    Err(TxError::Rollback { cause, rollback })
                }
            },
            Err(cause) => Err(interrupted(&tx, cause).await),
        }
    }
}

/// Rolls back after the context fired. The rollback runs without the context so it
/// cannot be cut short itself.
async fn interrupted<T: DbTransaction, E>(tx: &Tx<T>, cause: DbError) -> TxError<E> {
    let rollback = match tx.rollback().await {
        Ok(()) => None,
        Err(err) if err.is_tx_done() => None,
        Err(err) => {
            tracing::warn!(%cause, rollback = %err, "Failed to rollback interrupted transaction");
            Some(err)
        }
    };
    TxError::Interrupted { cause, rollback }
}
