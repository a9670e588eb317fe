//! Router - Read/Write Split
//!
//! Queries go to a random replica (or to the primary on request), mutations always
//! go to the primary. Every call classifies its statement before touching a
//! connection, so a SELECT handed to `exec` never reaches the network.

use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::ClusterConfig;
use crate::context::Context;
use crate::error::{DbError, Node};
use crate::pool::{DbPool, DbStatement, ExecResult};
use crate::set::ConnectionSet;
use crate::statement::{IntoStatement, Mutation, Query, Statement};
use crate::value::Value;

pub struct Router<P: DbPool> {
    set: ConnectionSet<P>,
    /// Serializes transactions; see `run_in_transaction`.
    pub(crate) tx_lock: Mutex<()>,
}

impl<P: DbPool> Router<P> {
    pub fn new(set: ConnectionSet<P>) -> Self {
        Self {
            set,
            tx_lock: Mutex::new(()),
        }
    }

    /// Opens the cluster described by `config`. See [`ConnectionSet::connect`].
    pub async fn connect(config: &ClusterConfig) -> Result<Self, DbError> {
        Ok(Self::new(ConnectionSet::connect(config).await?))
    }

    pub fn connections(&self) -> &ConnectionSet<P> {
        &self.set
    }

    fn route_query(&self, stmt: &Statement<Query>, to_primary: bool) -> &P {
        let (node, pool) = if to_primary {
            (Node::Primary, self.set.primary())
        } else {
            self.set.pick_replica()
        };
        tracing::debug!(sqlsplit.node = %node, sqlsplit.sql = %stmt, "Routing query");
        pool
    }

    fn route_mutation(&self, stmt: &Statement<Mutation>) -> &P {
        tracing::debug!(sqlsplit.node = %Node::Primary, sqlsplit.sql = %stmt, "Routing mutation");
        self.set.primary()
    }

    // ============== Queries ==============

    /// Runs a SELECT on a replica.
    pub async fn query(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
        args: &[Value],
    ) -> Result<Vec<P::Row>, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_query(&stmt, false);
        ctx.run(pool.query(stmt.as_str(), args)).await
    }

    /// Runs a SELECT on the primary.
    ///
    /// Use it to read rows written moments ago, which a lagging replica may not
    /// have yet.
    pub async fn query_for_primary(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
        args: &[Value],
    ) -> Result<Vec<P::Row>, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_query(&stmt, true);
        ctx.run(pool.query(stmt.as_str(), args)).await
    }

    /// Runs a SELECT expected to return at most one row, on a replica.
    /// Returns [`DbError::NoRows`] when it returns none.
    pub async fn query_row(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
        args: &[Value],
    ) -> Result<P::Row, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_query(&stmt, false);
        ctx.run(pool.query_row(stmt.as_str(), args)).await
    }

    /// [`query_row`](Self::query_row) on the primary.
    pub async fn query_row_for_primary(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
        args: &[Value],
    ) -> Result<P::Row, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_query(&stmt, true);
        ctx.run(pool.query_row(stmt.as_str(), args)).await
    }

    /// Prepares a SELECT on a replica. Every execution of the returned statement
    /// runs on that same replica.
    pub async fn prepare_query(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
    ) -> Result<PreparedQuery<P::Statement>, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_query(&stmt, false);
        let inner = ctx.run(pool.prepare(stmt.as_str())).await?;
        Ok(PreparedQuery { inner })
    }

    /// Prepares a SELECT on the primary.
    pub async fn prepare_query_for_primary(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Query>,
    ) -> Result<PreparedQuery<P::Statement>, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_query(&stmt, true);
        let inner = ctx.run(pool.prepare(stmt.as_str())).await?;
        Ok(PreparedQuery { inner })
    }

    // ============== Mutations ==============

    /// Runs an INSERT, UPDATE or DELETE on the primary.
    pub async fn exec(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Mutation>,
        args: &[Value],
    ) -> Result<ExecResult, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_mutation(&stmt);
        ctx.run(pool.exec(stmt.as_str(), args)).await
    }

    /// Prepares an INSERT, UPDATE or DELETE on the primary.
    pub async fn prepare_mutation(
        &self,
        ctx: &Context,
        stmt: impl IntoStatement<Mutation>,
    ) -> Result<PreparedMutation<P::Statement>, DbError> {
        let stmt = stmt.into_statement()?;
        let pool = self.route_mutation(&stmt);
        let inner = ctx.run(pool.prepare(stmt.as_str())).await?;
        Ok(PreparedMutation { inner })
    }

    // ============== Fleet ==============

    /// Pings every endpoint; see [`ConnectionSet::check_readable`].
    pub async fn check_readable(&self, ctx: &Context) -> Result<(), DbError> {
        self.set.check_readable(ctx).await
    }

    /// Pings the primary.
    pub async fn check_writable(&self, ctx: &Context) -> Result<(), DbError> {
        self.set.check_writable(ctx).await
    }

    pub async fn close(&self) -> Result<(), DbError> {
        self.set.close().await
    }

    /// Maximum amount of time a connection may be reused, on every endpoint.
    pub fn set_conn_max_lifetime(&self, lifetime: Option<Duration>) {
        self.set.set_conn_max_lifetime(lifetime);
    }

    /// Maximum number of idle connections kept, on every endpoint.
    pub fn set_max_idle_conns(&self, n: u32) {
        self.set.set_max_idle_conns(n);
    }

    /// Maximum number of open connections, on every endpoint. 0 means no limit.
    pub fn set_max_open_conns(&self, n: u32) {
        self.set.set_max_open_conns(n);
    }
}

impl<P: DbPool> std::fmt::Debug for Router<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("set", &self.set).finish()
    }
}

// ============== Prepared Statements ==============

/// A prepared SELECT. It can only be queried.
pub struct PreparedQuery<S> {
    inner: S,
}

impl<S: DbStatement> PreparedQuery<S> {
    pub fn sql(&self) -> &str {
        self.inner.sql()
    }

    pub async fn query(&self, ctx: &Context, args: &[Value]) -> Result<Vec<S::Row>, DbError> {
        ctx.run(self.inner.query(args)).await
    }

    pub async fn query_row(&self, ctx: &Context, args: &[Value]) -> Result<S::Row, DbError> {
        ctx.run(self.inner.query_row(args)).await
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// A prepared INSERT, UPDATE or DELETE. It can only be executed.
pub struct PreparedMutation<S> {
    inner: S,
}

impl<S: DbStatement> PreparedMutation<S> {
    pub fn sql(&self) -> &str {
        self.inner.sql()
    }

    pub async fn exec(&self, ctx: &Context, args: &[Value]) -> Result<ExecResult, DbError> {
        ctx.run(self.inner.exec(args)).await
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{SqlQuery, StatementError};
    use crate::testing::MockPool;

    fn router(replicas: &[&str]) -> Router<MockPool> {
        Router::new(ConnectionSet::new(
            MockPool::new("primary"),
            replicas.iter().map(|name| MockPool::new(name)),
        ))
    }

    fn all_calls(router: &Router<MockPool>) -> Vec<String> {
        let set = router.connections();
        let mut calls = set.primary().calls();
        for replica in set.replicas() {
            calls.extend(replica.calls());
        }
        calls
    }

    #[tokio::test]
    async fn test_queries_go_to_replicas() {
        let router = router(&["r0", "r1"]);
        let ctx = Context::background();
        for _ in 0..20 {
            let rows = router.query(&ctx, "SELECT * FROM items", &[]).await.unwrap();
            assert_ne!(rows, vec!["primary".to_string()]);
            let row = router
                .query_row(&ctx, "select * from items where id = ?", &["a".into()])
                .await
                .unwrap();
            assert!(row.starts_with('r'));
        }
        assert!(router.connections().primary().calls().is_empty());
    }

    #[tokio::test]
    async fn test_queries_without_replicas_use_primary() {
        let router = router(&[]);
        let row = router
            .query_row(&Context::background(), "SELECT 1", &[])
            .await
            .unwrap();
        assert_eq!(row, "primary");
    }

    #[tokio::test]
    async fn test_primary_reads_skip_replicas() {
        let router = router(&["r0"]);
        let ctx = Context::background();
        let rows = router
            .query_for_primary(&ctx, "SELECT * FROM items", &[])
            .await
            .unwrap();
        assert_eq!(rows, vec!["primary"]);
        let row = router
            .query_row_for_primary(&ctx, "SELECT * FROM items", &[])
            .await
            .unwrap();
        assert_eq!(row, "primary");
        assert!(router.connections().replicas()[0].calls().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_only_reach_primary() {
        let router = router(&["r0", "r1"]);
        let ctx = Context::background();
        for sql in [
            "INSERT INTO items(id, name) VALUES(?, ?)",
            "update items set name = ?",
            "DELETE FROM items",
        ] {
            let result = router.exec(&ctx, sql, &[]).await.unwrap();
            assert_eq!(result.rows_affected, 1);
        }
        assert_eq!(router.connections().primary().committed().len(), 3);
        for replica in router.connections().replicas() {
            assert!(replica.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn test_misclassified_statements_never_reach_the_network() {
        let router = router(&["r0"]);
        let ctx = Context::background();

        let err = router.exec(&ctx, "SELECT * FROM items", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Statement(StatementError::NotAMutation)));

        let err = router
            .query(&ctx, "INSERT INTO items VALUES (1)", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Statement(StatementError::NotAQuery)));

        let err = router
            .query_row_for_primary(&ctx, "delete from items", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Statement(StatementError::NotAQuery)));

        let err = router
            .prepare_mutation(&ctx, "select 1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Statement(StatementError::NotAMutation)));

        assert!(all_calls(&router).is_empty());
    }

    #[tokio::test]
    async fn test_classification_precedes_dead_connections() {
        let router = router(&[]);
        router.close().await.unwrap();
        let err = router
            .exec(&Context::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Statement(_)));
    }

    #[tokio::test]
    async fn test_prebuilt_statements_are_accepted() {
        let router = router(&["r0"]);
        let stmt = SqlQuery::new("SELECT name FROM items").unwrap();
        let rows = router
            .query(&Context::background(), &stmt, &[])
            .await
            .unwrap();
        assert_eq!(rows, vec!["r0"]);
    }

    #[tokio::test]
    async fn test_prepared_statements_stay_on_their_endpoint() {
        let router = router(&["r0"]);
        let ctx = Context::background();

        let query = router.prepare_query(&ctx, "SELECT * FROM items").await.unwrap();
        assert_eq!(query.sql(), "SELECT * FROM items");
        assert_eq!(query.query_row(&ctx, &[]).await.unwrap(), "r0");

        let query = router
            .prepare_query_for_primary(&ctx, "SELECT * FROM items")
            .await
            .unwrap();
        assert_eq!(query.query(&ctx, &[]).await.unwrap(), vec!["primary"]);

        let mutation = router
            .prepare_mutation(&ctx, "DELETE FROM items WHERE id = ?")
            .await
            .unwrap();
        mutation.exec(&ctx, &[1.into()]).await.unwrap();

        assert_eq!(
            router.connections().primary().calls(),
            vec![
                "prepare SELECT * FROM items",
                "stmt.query SELECT * FROM items",
                "prepare DELETE FROM items WHERE id = ?",
                "stmt.exec DELETE FROM items WHERE id = ?",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_slow_query() {
        let router = router(&["r0"]);
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let err = router
            .query(&ctx, "SELECT pg_sleep(60)", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout));
    }

    #[tokio::test]
    async fn test_pool_tuning_is_forwarded() {
        let router = router(&["r0"]);
        router.set_max_open_conns(8);
        assert_eq!(*router.connections().replicas()[0].tuning.lock(), vec!["open=8"]);
        assert_eq!(*router.connections().primary().tuning.lock(), vec!["open=8"]);
    }
}
