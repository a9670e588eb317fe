//! Connection Handle Traits
//!
//! `DbPool` abstracts over one database endpoint (a driver connection pool). The
//! router only ever talks to endpoints through these traits, so any client
//! library can sit underneath.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DbError;
use crate::value::Value;

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Backend-specific; `None` where the backend does not report one.
    pub last_insert_id: Option<i64>,
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read uncommitted (lowest isolation)
    ReadUncommitted,
    /// Read committed
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable (highest isolation)
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        })
    }
}

/// Characteristics requested when beginning a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// `None` keeps the server default.
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// `SET TRANSACTION ...` for these options, or `None` for server defaults.
    pub fn set_transaction_sql(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {level}"));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(", ")))
        }
    }
}

// ============== DbPool ==============

/// One database endpoint: the primary or a single replica.
///
/// Implementations are expected to be internally pooled and safe to share; the
/// router holds them behind shared references for its whole lifetime.
#[async_trait]
pub trait DbPool: Send + Sync + 'static {
    /// Row type produced by queries.
    type Row: Send + 'static;

    type Transaction: DbTransaction<Row = Self::Row>;

    type Statement: DbStatement<Row = Self::Row>;

    /// Build a handle for `url`. Only malformed input should fail here; reachability
    /// is checked with [`ping`](DbPool::ping).
    async fn open(url: &str) -> Result<Self, DbError>
    where
        Self: Sized;

    /// Check that the endpoint is reachable.
    async fn ping(&self) -> Result<(), DbError>;

    /// Close the pool gracefully.
    async fn close(&self) -> Result<(), DbError>;

    /// `None` lets connections live forever.
    fn set_conn_max_lifetime(&self, lifetime: Option<Duration>);

    fn set_max_idle_conns(&self, n: u32);

    /// 0 means no limit.
    fn set_max_open_conns(&self, n: u32);

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Self::Row>, DbError>;

    /// First row of the result; [`DbError::NoRows`] when there is none.
    async fn query_row(&self, sql: &str, args: &[Value]) -> Result<Self::Row, DbError>;

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, DbError>;

    async fn prepare(&self, sql: &str) -> Result<Self::Statement, DbError>;

    async fn begin(&self, options: &TxOptions) -> Result<Self::Transaction, DbError>;
}

// ============== DbTransaction ==============

/// An open transaction on one endpoint.
///
/// After `commit` or `rollback` every call fails with [`DbError::TxDone`].
#[async_trait]
pub trait DbTransaction: Send + 'static {
    type Row: Send + 'static;

    async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Self::Row>, DbError>;

    async fn query_row(&mut self, sql: &str, args: &[Value]) -> Result<Self::Row, DbError>;

    async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;
}

// ============== DbStatement ==============

/// A statement prepared on one endpoint, reusable with different arguments.
#[async_trait]
pub trait DbStatement: Send + Sync + 'static {
    type Row: Send + 'static;

    fn sql(&self) -> &str;

    async fn query(&self, args: &[Value]) -> Result<Vec<Self::Row>, DbError>;

    async fn query_row(&self, args: &[Value]) -> Result<Self::Row, DbError>;

    async fn exec(&self, args: &[Value]) -> Result<ExecResult, DbError>;
}
