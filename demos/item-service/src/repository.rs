//! Item persistence over the read/write splitting router.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlsplit::{Context, DbError, DbPool, Driver, QueryResult, args};
use sqlsplit_sqlx::{AnyRow, Row, SqlxRouter};

// ============== Domain Types ==============

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: String,
    pub name: String,
}

impl Item {
    fn from_row(row: &AnyRow) -> QueryResult<Self> {
        let decode = |e: sqlx::Error| DbError::QueryFailed(e.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(decode)?,
            name: row.try_get("name").map_err(decode)?,
        })
    }
}

// ============== Repository ==============

#[async_trait]
pub trait ItemRepository: Send + Sync + 'static {
    async fn find_all(&self, ctx: &Context) -> QueryResult<Vec<Item>>;

    /// `Ok(None)` when no item has this id.
    async fn find_by_id(&self, ctx: &Context, id: &str) -> QueryResult<Option<Item>>;

    /// Inserts the item and returns it as stored.
    async fn create(&self, ctx: &Context, item: Item) -> QueryResult<Item>;
}

/// Rewrites `?` placeholders as `$1, $2, ...` for PostgreSQL; other drivers take
/// `?` as written. The queries here carry no string literals, so every `?` is a
/// parameter.
fn placeholders(driver: Driver, sql: &str) -> Cow<'_, str> {
    if driver != Driver::Postgres {
        return Cow::Borrowed(sql);
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for c in sql.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

pub struct SqlItemRepository {
    router: Arc<SqlxRouter>,
    driver: Driver,
}

impl SqlItemRepository {
    pub fn new(router: Arc<SqlxRouter>, driver: Driver) -> Self {
        Self { router, driver }
    }

    fn sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        placeholders(self.driver, sql)
    }

    /// Creates the `items` table on the primary.
    ///
    /// Local SQLite clusters have no replication, so there the table is created on
    /// every replica file as well.
    pub async fn migrate(&self, ctx: &Context) -> QueryResult<()> {
        const DDL: &str = "CREATE TABLE IF NOT EXISTS items (id VARCHAR(36) PRIMARY KEY, name VARCHAR(255) NOT NULL)";

        let set = self.router.connections();
        ctx.run(set.primary().exec(DDL, &[])).await?;
        if self.driver == Driver::Sqlite {
            for replica in set.replicas() {
                ctx.run(replica.exec(DDL, &[])).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for SqlItemRepository {
    async fn find_all(&self, ctx: &Context) -> QueryResult<Vec<Item>> {
        let rows = self
            .router
            .query(ctx, "SELECT id, name FROM items ORDER BY name", &[])
            .await?;
        rows.iter().map(Item::from_row).collect()
    }

    async fn find_by_id(&self, ctx: &Context, id: &str) -> QueryResult<Option<Item>> {
        match self
            .router
            .query_row(ctx, &*self.sql("SELECT id, name FROM items WHERE id = ?"), &args![id])
            .await
        {
            Ok(row) => Item::from_row(&row).map(Some),
            Err(DbError::NoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, ctx: &Context, item: Item) -> QueryResult<Item> {
        self.router
            .exec(
                ctx,
                &*self.sql("INSERT INTO items (id, name) VALUES (?, ?)"),
                &args![&item.id, &item.name],
            )
            .await?;

        // replicas may lag behind the insert
        let row = self
            .router
            .query_row_for_primary(
                ctx,
                &*self.sql("SELECT id, name FROM items WHERE id = ?"),
                &args![&item.id],
            )
            .await?;
        Item::from_row(&row)
    }
}
