//! sqlx-backed endpoint.
//!
//! One `SqlxPool` wraps one `sqlx::AnyPool`, so the same type serves MySQL,
//! PostgreSQL and SQLite endpoints. The driver is picked from the URL scheme.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sqlsplit::{DbError, DbPool, Driver, ExecResult, TxOptions, Value};
use sqlx::any::{AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::{AnyPool, Executor};

use crate::error::{bind, map_err};
use crate::statement::SqlxStatement;
use crate::transaction::SqlxTransaction;

/// Pool tuning, applied by rebuilding the underlying pool.
#[derive(Debug, Clone, Copy)]
struct Tuning {
    max_open: u32,
    max_idle: u32,
    lifetime: Option<Duration>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 0,
            lifetime: None,
        }
    }
}

/// Stands in for "no limit" when `max_open` is 0. sqlx sizes its idle queue by
/// `max_connections` up front, so the cap has to stay finite.
const UNLIMITED_OPEN: u32 = 8192;

impl Tuning {
    fn max_connections(&self) -> u32 {
        match self.max_open {
            0 => UNLIMITED_OPEN,
            n => n,
        }
    }

    fn options(&self) -> AnyPoolOptions {
        let max_open = self.max_connections();
        AnyPoolOptions::new()
            .max_connections(max_open)
            .min_connections(self.max_idle.min(max_open))
            .max_lifetime(self.lifetime)
    }
}

struct Shared {
    url: String,
    driver: Driver,
    pool: RwLock<AnyPool>,
    tuning: Mutex<Tuning>,
    closed: AtomicBool,
}

/// A MySQL, PostgreSQL or SQLite endpoint.
///
/// Cheap to clone; clones share the same connections. Must be opened and tuned
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct SqlxPool {
    shared: Arc<Shared>,
}

impl SqlxPool {
    pub fn driver(&self) -> Driver {
        self.shared.driver
    }

    /// The pool currently serving calls.
    pub fn inner(&self) -> Result<AnyPool, DbError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DbError::PoolClosed);
        }
        Ok(self.shared.pool.read().clone())
    }

    /// sqlx pools cannot be resized in place: build a fresh lazy pool with the new
    /// settings and swap it in. The old pool is not closed; callers already holding
    /// it finish on it, and its connections go away with the last clone.
    fn retune(&self, apply: impl FnOnce(&mut Tuning)) {
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut tuning = self.shared.tuning.lock();
        apply(&mut tuning);

        let pool = match tuning.options().connect_lazy(&self.shared.url) {
            Ok(pool) => pool,
            Err(error) => {
                tracing::warn!(sqlsplit.driver = %self.shared.driver, %error, "Failed to apply pool settings");
                return;
            }
        };
        let old = std::mem::replace(&mut *self.shared.pool.write(), pool);
        tracing::debug!(sqlsplit.driver = %self.shared.driver, tuning = ?*tuning, "Pool rebuilt");
        drop(old);
    }
}

impl std::fmt::Debug for SqlxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxPool")
            .field("driver", &self.shared.driver)
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

pub(crate) fn exec_result(result: AnyQueryResult) -> ExecResult {
    ExecResult {
        rows_affected: result.rows_affected(),
        last_insert_id: result.last_insert_id(),
    }
}

#[async_trait]
impl DbPool for SqlxPool {
    type Row = AnyRow;
    type Transaction = SqlxTransaction;
    type Statement = SqlxStatement;

    /// Validates the URL and prepares a lazy pool; no connection is made yet.
    async fn open(url: &str) -> Result<Self, DbError> {
        let driver = Driver::from_url(url).ok_or_else(|| {
            DbError::Configuration("unsupported connection url scheme".to_string())
        })?;
        sqlx::any::install_default_drivers();

        let tuning = Tuning::default();
        let pool = tuning
            .options()
            .connect_lazy(url)
            .map_err(|e| DbError::Connect(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(Shared {
                url: url.to_string(),
                driver,
                pool: RwLock::new(pool),
                tuning: Mutex::new(tuning),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn ping(&self) -> Result<(), DbError> {
        let pool = self.inner()?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        let pool = self.shared.pool.read().clone();
        pool.close().await;
        Ok(())
    }

    fn set_conn_max_lifetime(&self, lifetime: Option<Duration>) {
        self.retune(|tuning| tuning.lifetime = lifetime);
    }

    fn set_max_idle_conns(&self, n: u32) {
        self.retune(|tuning| tuning.max_idle = n);
    }

    fn set_max_open_conns(&self, n: u32) {
        self.retune(|tuning| tuning.max_open = n);
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<AnyRow>, DbError> {
        let pool = self.inner()?;
        bind(sqlx::query(sql), args)
            .fetch_all(&pool)
            .await
            .map_err(map_err)
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> Result<AnyRow, DbError> {
        let pool = self.inner()?;
        bind(sqlx::query(sql), args)
            .fetch_one(&pool)
            .await
            .map_err(map_err)
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, DbError> {
        let pool = self.inner()?;
        let result = bind(sqlx::query(sql), args)
            .execute(&pool)
            .await
            .map_err(map_err)?;
        Ok(exec_result(result))
    }

    /// Prepares `sql` once on this endpoint so syntax errors surface here; later
    /// executions reuse the per-connection statement cache.
    async fn prepare(&self, sql: &str) -> Result<SqlxStatement, DbError> {
        let pool = self.inner()?;
        (&pool).prepare(sql).await.map_err(map_err)?;
        Ok(SqlxStatement::new(self.clone(), sql))
    }

    async fn begin(&self, options: &TxOptions) -> Result<SqlxTransaction, DbError> {
        let set_transaction = options.set_transaction_sql();
        if set_transaction.is_some() && self.shared.driver != Driver::Postgres {
            return Err(DbError::Unsupported(format!(
                "transaction options on {}",
                self.shared.driver
            )));
        }

        let pool = self.inner()?;
        let mut tx = pool.begin().await.map_err(map_err)?;
        if let Some(sql) = set_transaction {
            sqlx::query(&sql).execute(&mut *tx).await.map_err(map_err)?;
        }
        Ok(SqlxTransaction::new(tx))
    }
}
