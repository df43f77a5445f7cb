//! SQLx-backed PostgreSQL pool and state store.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Executor, Postgres};

use crate::error::{PoolError, StateStoreError};
use crate::pool::{PoolSession, SchemaPool};
use crate::sql;
use crate::state_table::StateStore;
use crate::types::ConnectionStateRow;

/// Default number of sessions opened for a reconciliation pass.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 25;

/// A [`SchemaPool`] over an sqlx PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgSchemaPool {
    pool: PgPool,
}

impl PgSchemaPool {
    /// Connects to the database at `url` with at most `max_connections`
    /// sessions.
    ///
    /// # Errors
    /// Returns an error if the URL is not a PostgreSQL URL or the connection
    /// fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, PoolError> {
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(PoolError::Acquire(format!(
                "unsupported database URL scheme: {}",
                url.split("://").next().unwrap_or(url)
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pg_pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SchemaPool for PgSchemaPool {
    async fn exec(&self, sql: &str) -> Result<(), PoolError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn acquire(&self) -> Result<Box<dyn PoolSession>, PoolError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }

    fn max_connections(&self) -> usize {
        self.pool.options().get_max_connections() as usize
    }
}

struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl PoolSession for PgSession {
    async fn exec(&mut self, sql: &str) -> Result<(), PoolError> {
        let conn: &mut PgConnection = &mut self.conn;
        conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn exec_in_transaction(&mut self, statements: &[&str]) -> Result<(), PoolError> {
        let mut tx = self.conn.begin().await?;
        for statement in statements {
            let conn: &mut PgConnection = &mut tx;
            conn.execute(sqlx::raw_sql(statement)).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, PoolError> {
        let rows = sqlx::query_scalar::<_, String>(sql)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }
}

/// Persists connection state rows to a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
    upsert: String,
}

impl PgStateStore {
    /// Creates the state table if needed and returns a store writing to it.
    pub async fn new(pool: PgPool, table: &str) -> Result<Self, StateStoreError> {
        sqlx::query(&sql::state_table_ddl(table))
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            upsert: sql::state_upsert(table),
        })
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn write(&self, rows: &[ConnectionStateRow]) -> Result<(), StateStoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&self.upsert)
                .bind(&row.name)
                .bind(row.state.as_str())
                .bind(row.error_message.as_deref())
                .bind(row.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
