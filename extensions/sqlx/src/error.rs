//! Translation of sqlx errors and arguments into the router's vocabulary.

use sqlsplit::{DbError, Value};
use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;

/// Messages backends return when asked to end a transaction that is no longer open.
const TX_DONE_MESSAGES: &[&str] = &[
    "cannot commit - no transaction is active",
    "cannot rollback - no transaction is active",
    "there is no transaction in progress",
];

pub(crate) fn map_err(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::RowNotFound => DbError::NoRows,
        sqlx::Error::PoolClosed => DbError::PoolClosed,
        sqlx::Error::PoolTimedOut => DbError::Timeout,
        sqlx::Error::Configuration(e) => DbError::Configuration(e.to_string()),
        sqlx::Error::Database(e) if is_tx_done_message(e.message()) => DbError::TxDone,
        sqlx::Error::Database(e) => DbError::QueryFailed(e.to_string()),
        other => DbError::Backend(other.to_string()),
    }
}

fn is_tx_done_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TX_DONE_MESSAGES
        .iter()
        .any(|known| message.contains(known))
}

/// Binds positional arguments in order.
pub(crate) fn bind<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    args: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
        };
    }
    query
}
