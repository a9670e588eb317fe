use std::sync::Arc;

use async_trait::async_trait;
use sqlsplit::{DbError, DbStatement, ExecResult, Value};
use sqlx::any::AnyRow;

use crate::error::{bind, map_err};
use crate::pool::{SqlxPool, exec_result};

/// Statement prepared on one endpoint; it always runs there.
pub struct SqlxStatement {
    pool: SqlxPool,
    sql: Arc<str>,
}

impl SqlxStatement {
    pub(crate) fn new(pool: SqlxPool, sql: &str) -> Self {
        Self {
            pool,
            sql: Arc::from(sql),
        }
    }

    /// The endpoint this statement was prepared on.
    pub fn pool(&self) -> &SqlxPool {
        &self.pool
    }
}

#[async_trait]
impl DbStatement for SqlxStatement {
    type Row = AnyRow;

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn query(&self, args: &[Value]) -> Result<Vec<AnyRow>, DbError> {
        let pool = self.pool.inner()?;
        bind(sqlx::query(&self.sql), args)
            .fetch_all(&pool)
            .await
            .map_err(map_err)
    }

    async fn query_row(&self, args: &[Value]) -> Result<AnyRow, DbError> {
        let pool = self.pool.inner()?;
        bind(sqlx::query(&self.sql), args)
            .fetch_one(&pool)
            .await
            .map_err(map_err)
    }

    async fn exec(&self, args: &[Value]) -> Result<ExecResult, DbError> {
        let pool = self.pool.inner()?;
        let result = bind(sqlx::query(&self.sql), args)
            .execute(&pool)
            .await
            .map_err(map_err)?;
        Ok(exec_result(result))
    }
}
