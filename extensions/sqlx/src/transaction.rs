use async_trait::async_trait;
use sqlsplit::{DbError, DbTransaction, ExecResult, Value};
use sqlx::any::{Any, AnyRow};

use crate::error::{bind, map_err};
use crate::pool::exec_result;

/// Transaction on one primary connection.
///
/// After commit or rollback the connection is returned to the pool and every
/// further call fails with [`DbError::TxDone`]. Dropping an unfinished
/// transaction rolls it back.
pub struct SqlxTransaction {
    inner: Option<sqlx::Transaction<'static, Any>>,
}

impl SqlxTransaction {
    pub(crate) fn new(tx: sqlx::Transaction<'static, Any>) -> Self {
        Self { inner: Some(tx) }
    }

    /// Get the underlying sqlx transaction, if it is still open.
    pub fn inner(&mut self) -> Option<&mut sqlx::Transaction<'static, Any>> {
        self.inner.as_mut()
    }

    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Any>, DbError> {
        self.inner.as_mut().ok_or(DbError::TxDone)
    }
}

#[async_trait]
impl DbTransaction for SqlxTransaction {
    type Row = AnyRow;

    async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<AnyRow>, DbError> {
        let tx = self.open()?;
        bind(sqlx::query(sql), args)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_err)
    }

    async fn query_row(&mut self, sql: &str, args: &[Value]) -> Result<AnyRow, DbError> {
        let tx = self.open()?;
        bind(sqlx::query(sql), args)
            .fetch_one(&mut **tx)
            .await
            .map_err(map_err)
    }

    async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, DbError> {
        let tx = self.open()?;
        let result = bind(sqlx::query(sql), args)
            .execute(&mut **tx)
            .await
            .map_err(map_err)?;
        Ok(exec_result(result))
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let tx = self.inner.take().ok_or(DbError::TxDone)?;
        tx.commit().await.map_err(map_err)
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let tx = self.inner.take().ok_or(DbError::TxDone)?;
        tx.rollback().await.map_err(map_err)
    }
}
