//! PostgreSQL backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use super::{column_list, Database, Ident, BACKUP_MARKER_COLUMN};
use crate::config::{DatabaseConfig, TimeoutConfig};
use crate::error::DbError;

/// PostgreSQL implementation of [`Database`].
///
/// Every call is bounded by the statement timeout. With the default single
/// connection, session state (for example `BEGIN`/`COMMIT` inside a phase
/// file) stays on one backend.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgDatabase {
    /// Build a pool for `options` without opening a connection.
    ///
    /// The first query connects. Acquiring a connection is bounded by the
    /// connect timeout, so an unreachable server surfaces as a query error
    /// from the first caller instead of here.
    pub fn connect_lazy(options: PgConnectOptions, database: &DatabaseConfig, timeouts: &TimeoutConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections.max(1))
            .acquire_timeout(timeouts.connect())
            .connect_lazy_with(options);

        Self {
            pool,
            statement_timeout: timeouts.statement(),
        }
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>> + Send,
    {
        tokio::time::timeout(self.statement_timeout, fut)
            .await
            .map_err(|_| DbError::Timeout(self.statement_timeout))?
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn ping(&self, check_table: &Ident) -> Result<(), DbError> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", check_table.quoted());
        self.bounded(async {
            sqlx::query(&sql).fetch_optional(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn execute(&self, statement: &str) -> Result<u64, DbError> {
        self.bounded(async {
            let result = sqlx::raw_sql(statement).execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn execute_script(&self, script: &str) -> Result<(), DbError> {
        self.bounded(async {
            sqlx::raw_sql(script).execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn table_exists(&self, table: &Ident) -> Result<bool, DbError> {
        self.bounded(async {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
            )
            .bind(table.as_str())
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        })
        .await
    }

    async fn columns(&self, table: &Ident) -> Result<Vec<String>, DbError> {
        self.bounded(async {
            let columns: Vec<String> = sqlx::query_scalar(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position",
            )
            .bind(table.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(columns)
        })
        .await
    }

    async fn count_rows(&self, table: &Ident) -> Result<u64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        self.bounded(async {
            let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn snapshot_table(
        &self,
        source: &Ident,
        backup: &Ident,
        columns: &[Ident],
        generation: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let marker = Ident::new(BACKUP_MARKER_COLUMN)?.quoted();
        let cols = column_list(columns);
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (LIKE {})",
            backup.quoted(),
            source.quoted()
        );
        let add_marker = format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {marker} timestamptz",
            backup.quoted()
        );
        let copy = format!(
            "INSERT INTO {} ({cols}, {marker}) SELECT {cols}, $1 FROM {}",
            backup.quoted(),
            source.quoted()
        );

        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&create).execute(&mut *tx).await?;
            sqlx::query(&add_marker).execute(&mut *tx).await?;
            let copied = sqlx::query(&copy)
                .bind(generation)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;
            Ok(copied)
        })
        .await
    }

    async fn count_generation(&self, backup: &Ident, generation: DateTime<Utc>) -> Result<u64, DbError> {
        let marker = Ident::new(BACKUP_MARKER_COLUMN)?.quoted();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {marker} = $1", backup.quoted());
        self.bounded(async {
            let count: i64 = sqlx::query_scalar(&sql).bind(generation).fetch_one(&self.pool).await?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn restore_table(
        &self,
        target: &Ident,
        backup: &Ident,
        columns: &[Ident],
        generation: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let marker = Ident::new(BACKUP_MARKER_COLUMN)?.quoted();
        let cols = column_list(columns);
        let truncate = format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", target.quoted());
        let insert = format!(
            "INSERT INTO {target} ({cols}) OVERRIDING SYSTEM VALUE \
             SELECT {cols} FROM {backup} WHERE {marker} = $1",
            target = target.quoted(),
            backup = backup.quoted(),
        );

        // Dropping the transaction on timeout or error rolls it back.
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&truncate).execute(&mut *tx).await?;
            let inserted = sqlx::query(&insert)
                .bind(generation)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;
            Ok(inserted)
        })
        .await
    }
}
