// # sqlsplit sqlx backend
//
// Implements the router's `DbPool` over `sqlx::AnyPool`, so one router type
// serves MySQL, PostgreSQL and SQLite clusters. Rows come back as
// `sqlx::any::AnyRow`; read columns with `sqlx::Row::try_get`.
//
// Placeholders are passed through untouched: use `?` for MySQL and SQLite and
// `$1, $2, ..` for PostgreSQL.

mod error;
pub mod pool;
pub mod statement;
pub mod transaction;

use sqlsplit::{ClusterConfig, ConnectionSet, Context, DbError, Router};

// Re-exports for convenience
pub use pool::SqlxPool;
pub use statement::SqlxStatement;
pub use transaction::SqlxTransaction;

pub use sqlx::Row;
pub use sqlx::any::AnyRow;

/// Router over sqlx endpoints.
pub type SqlxRouter = Router<SqlxPool>;

/// Opens a router from a primary URL and replica URLs.
///
/// Replicas that cannot be opened or pinged within `ctx` are left out.
pub async fn open<S: AsRef<str>>(
    ctx: &Context,
    primary_url: &str,
    replica_urls: &[S],
) -> Result<SqlxRouter, DbError> {
    let set = ConnectionSet::open(ctx, primary_url, replica_urls).await?;
    Ok(Router::new(set))
}

/// Opens a router from a cluster config, applying its pool settings.
pub async fn connect(config: &ClusterConfig) -> Result<SqlxRouter, DbError> {
    Router::connect(config).await
}

pub mod prelude {
    pub use crate::{SqlxPool, SqlxRouter};
    pub use sqlsplit::prelude::*;
    pub use sqlx::Row;
}
