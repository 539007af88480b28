mod accounts;
mod activity;
mod error;
mod operations;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::config::LedgerConfig;

pub use accounts::*;
pub use activity::*;
pub use error::*;
pub use operations::*;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration adding the account activity journal
pub const MIGRATION_002_ACTIVITY: &str = include_str!("migrations/002_activity.sql");

/// Owner of the shared connection pool. Cloning is cheap and shares the pool.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the connection pool described by `config`.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(config: &LedgerConfig) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| map_sqlx_error("parse database url", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        debug!(
            url = %config.database_url,
            max_connections = config.max_connections,
            "connection pool ready"
        );
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run more than once.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migration 001", e))?;
        sqlx::query(MIGRATION_002_ACTIVITY)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migration 002", e))?;
        info!("database schema is up to date");
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> StorageResult<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a transaction. Dropping it without commit rolls back.
    pub async fn begin(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin transaction", e))
    }

    /// Start a transaction that already holds the database write lock.
    ///
    /// SQLite transactions begin deferred, so two writers can both read a balance
    /// before either takes the lock. The no-op update claims the lock first,
    /// which makes every read inside the transaction current until commit.
    pub async fn begin_write(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        let mut tx = self.begin().await?;
        sqlx::query("UPDATE sequence_counter SET value = value WHERE name = 'operation_sequence'")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("acquire write lock", e))?;
        Ok(tx)
    }

    /// Acquire a pooled connection, returned to the pool on drop.
    pub async fn acquire(&self) -> StorageResult<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire connection", e))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for in-flight work and close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Timestamps are stored as fixed-width RFC 3339 strings with microseconds,
/// so lexical order in SQL matches chronological order.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str, field: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StorageError::Corrupt(format!("invalid {} timestamp {:?}: {}", field, value, e))
        })
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StorageError::Corrupt(format!("column {}: {}", name, e)))
}
