// # sqlsplit
//
// Read/write splitting over one primary and any number of read replicas.
// Reads go to a random replica, writes and transactions go to the primary.
// Statements are checked before anything touches the network: a query must
// start with SELECT, a mutation with INSERT, UPDATE or DELETE.
//
// The crate is backend-agnostic. A backend implements `DbPool` (see the
// `sqlsplit-sqlx` crate for the sqlx one) and is driven through `Router`.

pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod router;
pub mod set;
pub mod statement;
pub mod transaction;
pub mod value;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{ClusterConfig, Config, Driver, PoolSettings};
pub use context::Context;
pub use error::{DbError, FleetError, FleetOp, Node, NodeFailure, QueryResult, TxError};
pub use pool::{DbPool, DbStatement, DbTransaction, ExecResult, IsolationLevel, TxOptions};
pub use router::{PreparedMutation, PreparedQuery, Router};
pub use set::ConnectionSet;
pub use statement::{
    IntoStatement, Mutation, Query, SqlMutation, SqlQuery, Statement, StatementError,
    StatementKind, validate_mutation, validate_query,
};
pub use transaction::Tx;
pub use value::Value;

// Cancellation tokens are part of the `Context` API.
pub use tokio_util::sync::CancellationToken;

pub mod prelude {
    pub use crate::args;
    pub use crate::config::{ClusterConfig, Config, Driver};
    pub use crate::context::Context;
    pub use crate::error::{DbError, QueryResult, TxError};
    pub use crate::pool::{DbPool, ExecResult, IsolationLevel, TxOptions};
    pub use crate::router::Router;
    pub use crate::statement::{SqlMutation, SqlQuery};
    pub use crate::transaction::Tx;
    pub use crate::value::Value;
}
