//! Error types shared by the router, the connection set and the backends.

use std::fmt;

use crate::statement::StatementError;

/// Database operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error("Failed to open connection: {0}")]
    Connect(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("No rows returned")]
    NoRows,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Transaction already completed")]
    TxDone,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Fleet(#[from] FleetError),
}

impl DbError {
    /// True when the transaction was already committed or rolled back.
    pub fn is_tx_done(&self) -> bool {
        matches!(self, DbError::TxDone)
    }

    /// True when the call was abandoned because its context fired.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, DbError::Cancelled | DbError::Timeout)
    }
}

/// Result type for database operations.
pub type QueryResult<T> = Result<T, DbError>;

// ============== Fleet Errors ==============

/// One member of a connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Primary,
    /// Replica at this position in construction order.
    Replica(usize),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Primary => f.write_str("master"),
            Node::Replica(index) => write!(f, "replica{index}"),
        }
    }
}

/// The fleet-wide operation that produced a [`FleetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetOp {
    Ping,
    Close,
}

impl fmt::Display for FleetOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetOp::Ping => f.write_str("ping"),
            FleetOp::Close => f.write_str("close"),
        }
    }
}

#[derive(Debug)]
pub struct NodeFailure {
    pub node: Node,
    pub error: DbError,
}

/// Every failure collected while running one operation across the whole set.
///
/// Renders as the comma-joined list `failed to ping master: ..,failed to ping replica1: ..`.
#[derive(Debug)]
pub struct FleetError {
    op: FleetOp,
    failures: Vec<NodeFailure>,
}

impl FleetError {
    /// Returns `Ok(())` when nothing failed.
    pub(crate) fn collect(op: FleetOp, failures: Vec<NodeFailure>) -> Result<(), FleetError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FleetError { op, failures })
        }
    }

    pub fn op(&self) -> FleetOp {
        self.op
    }

    /// Failures in order: primary first, then replicas in construction order.
    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    pub fn failed(&self, node: Node) -> Option<&DbError> {
        self.failures
            .iter()
            .find(|failure| failure.node == node)
            .map(|failure| &failure.error)
    }

    pub fn into_failures(self) -> Vec<NodeFailure> {
        self.failures
    }
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "failed to {} {}: {}", self.op, failure.node, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for FleetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|failure| &failure.error as &(dyn std::error::Error + 'static))
    }
}

// ============== Transaction Errors ==============

/// Outcome of a failed [`Router::run_in_transaction`](crate::Router::run_in_transaction).
///
/// `E` is the error type returned by the caller's callback.
#[derive(Debug, thiserror::Error)]
pub enum TxError<E> {
    #[error("Failed to begin transaction: {0}")]
    Begin(DbError),

    /// The callback failed and the transaction was rolled back (or had already ended).
    #[error("Failed to execute transaction: {0}")]
    Callback(E),

    /// The callback failed and the rollback failed too; the transaction outcome is
    /// unknown to the client.
    #[error("Failed to rollback transaction: {rollback} (after: {cause})")]
    Rollback { cause: E, rollback: DbError },

    /// The context fired while the callback was running. `rollback` holds the
    /// rollback failure, if any.
    #[error("Transaction interrupted: {cause}")]
    Interrupted {
        cause: DbError,
        rollback: Option<DbError>,
    },

    /// Commit failed; the driver error is passed through unchanged.
    #[error(transparent)]
    Commit(DbError),
}

impl<E> TxError<E> {
    /// The callback's own error, when the callback is what failed.
    pub fn cause(&self) -> Option<&E> {
        match self {
            TxError::Callback(cause) | TxError::Rollback { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn into_cause(self) -> Option<E> {
        match self {
            TxError::Callback(cause) | TxError::Rollback { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
