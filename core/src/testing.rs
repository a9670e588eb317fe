//! In-memory `DbPool` used by the unit tests.
//!
//! Rows are just the name of the endpoint that served them, so a test can see
//! where a statement was routed. Every call is journaled per endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::DbError;
use crate::pool::{DbPool, DbStatement, DbTransaction, ExecResult, TxOptions};
use crate::value::Value;

/// What a mock transaction does when asked to roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackBehavior {
    Succeed,
    AlreadyDone,
    Fail,
}

pub struct MockPool {
    pub name: String,
    calls: Arc<Mutex<Vec<String>>>,
    committed: Arc<Mutex<Vec<String>>>,
    reachable: AtomicBool,
    closed: AtomicBool,
    fail_close: AtomicBool,
    slow_ping: AtomicBool,
    rollback: Mutex<RollbackBehavior>,
    pub tuning: Mutex<Vec<String>>,
}

impl MockPool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::default(),
            committed: Arc::default(),
            reachable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            slow_ping: AtomicBool::new(false),
            rollback: Mutex::new(RollbackBehavior::Succeed),
            tuning: Mutex::default(),
        }
    }

    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing_close(self) -> Self {
        self.fail_close.store(true, Ordering::SeqCst);
        self
    }

    /// Pings hang for a minute before answering.
    pub fn slow_ping(self) -> Self {
        self.slow_ping.store(true, Ordering::SeqCst);
        self
    }

    pub fn rollback_behavior(self, behavior: RollbackBehavior) -> Self {
        *self.rollback.lock() = behavior;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Mutations that reached the store, outside or through committed transactions.
    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().clone()
    }

    fn record(&self, op: &str, sql: &str) {
        self.calls.lock().push(format!("{op} {sql}").trim_end().to_string());
    }

    fn usable(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::PoolClosed);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(DbError::Backend(format!("{}: connection refused", self.name)));
        }
        Ok(())
    }
}

async fn simulate(sql: &str) -> Result<(), DbError> {
    if sql.contains("pg_sleep") {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    if sql.contains("missing_table") {
        return Err(DbError::QueryFailed("no such table: missing_table".to_string()));
    }
    Ok(())
}

#[async_trait]
impl DbPool for MockPool {
    type Row = String;
    type Transaction = MockTransaction;
    type Statement = MockStatement;

    async fn open(url: &str) -> Result<Self, DbError> {
        let rest = url
            .strip_prefix("mock://")
            .ok_or_else(|| DbError::Configuration(format!("not a mock url: {url}")))?;
        let (name, flag) = rest.split_once('?').unwrap_or((rest, ""));
        match flag {
            "broken" => Err(DbError::Connect(format!("{name}: bad handshake"))),
            "down" => Ok(MockPool::new(name).unreachable()),
            "slow" => Ok(MockPool::new(name).slow_ping()),
            _ => Ok(MockPool::new(name)),
        }
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.record("ping", "");
        if self.slow_ping.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.usable()
    }

    async fn close(&self) -> Result<(), DbError> {
        self.record("close", "");
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::Backend(format!("{}: close failed", self.name)));
        }
        Ok(())
    }

    fn set_conn_max_lifetime(&self, lifetime: Option<Duration>) {
        self.tuning.lock().push(format!("lifetime={lifetime:?}"));
    }

    fn set_max_idle_conns(&self, n: u32) {
        self.tuning.lock().push(format!("idle={n}"));
    }

    fn set_max_open_conns(&self, n: u32) {
        self.tuning.lock().push(format!("open={n}"));
    }

    async fn query(&self, sql: &str, _args: &[Value]) -> Result<Vec<String>, DbError> {
        self.record("query", sql);
        self.usable()?;
        simulate(sql).await?;
        Ok(vec![self.name.clone()])
    }

    async fn query_row(&self, sql: &str, _args: &[Value]) -> Result<String, DbError> {
        self.record("query_row", sql);
        self.usable()?;
        simulate(sql).await?;
        Ok(self.name.clone())
    }

    async fn exec(&self, sql: &str, _args: &[Value]) -> Result<ExecResult, DbError> {
        self.record("exec", sql);
        self.usable()?;
        simulate(sql).await?;
        self.committed.lock().push(sql.to_string());
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    async fn prepare(&self, sql: &str) -> Result<MockStatement, DbError> {
        self.record("prepare", sql);
        self.usable()?;
        Ok(MockStatement {
            name: self.name.clone(),
            sql: sql.to_string(),
            calls: Arc::clone(&self.calls),
        })
    }

    async fn begin(&self, options: &TxOptions) -> Result<MockTransaction, DbError> {
        self.record("begin", options.set_transaction_sql().as_deref().unwrap_or(""));
        self.usable()?;
        Ok(MockTransaction {
            name: self.name.clone(),
            calls: Arc::clone(&self.calls),
            committed: Arc::clone(&self.committed),
            staged: Vec::new(),
            done: false,
            rollback: *self.rollback.lock(),
        })
    }
}

pub struct MockTransaction {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
    committed: Arc<Mutex<Vec<String>>>,
    staged: Vec<String>,
    done: bool,
    rollback: RollbackBehavior,
}

impl MockTransaction {
    fn record(&self, op: &str, sql: &str) -> Result<(), DbError> {
        self.calls.lock().push(format!("tx.{op} {sql}").trim_end().to_string());
        if self.done {
            return Err(DbError::TxDone);
        }
        Ok(())
    }
}

#[async_trait]
impl DbTransaction for MockTransaction {
    type Row = String;

    async fn query(&mut self, sql: &str, _args: &[Value]) -> Result<Vec<String>, DbError> {
        self.record("query", sql)?;
        simulate(sql).await?;
        Ok(vec![self.name.clone()])
    }

    async fn query_row(&mut self, sql: &str, _args: &[Value]) -> Result<String, DbError> {
        self.record("query_row", sql)?;
        simulate(sql).await?;
        Ok(self.name.clone())
    }

    async fn exec(&mut self, sql: &str, _args: &[Value]) -> Result<ExecResult, DbError> {
        self.record("exec", sql)?;
        simulate(sql).await?;
        self.staged.push(sql.to_string());
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.record("commit", "")?;
        self.done = true;
        self.committed.lock().append(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.record("rollback", "")?;
        self.done = true;
        self.staged.clear();
        match self.rollback {
            RollbackBehavior::Succeed => Ok(()),
            RollbackBehavior::AlreadyDone => Err(DbError::TxDone),
            RollbackBehavior::Fail => Err(DbError::Backend("connection reset".to_string())),
        }
    }
}

pub struct MockStatement {
    name: String,
    sql: String,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl DbStatement for MockStatement {
    type Row = String;

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn query(&self, _args: &[Value]) -> Result<Vec<String>, DbError> {
        self.calls.lock().push(format!("stmt.query {}", self.sql));
        Ok(vec![self.name.clone()])
    }

    async fn query_row(&self, _args: &[Value]) -> Result<String, DbError> {
        self.calls.lock().push(format!("stmt.query_row {}", self.sql));
        Ok(self.name.clone())
    }

    async fn exec(&self, _args: &[Value]) -> Result<ExecResult, DbError> {
        self.calls.lock().push(format!("stmt.exec {}", self.sql));
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }
}
