//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - Per-guild configuration (`communities`)
//! - Event-to-channel mappings (`events`)
//!
//! Nothing here is cached in memory; handlers re-read before acting.

mod communities;
mod events;

pub use communities::{CommunityRecord, CommunityRepository, CommunityUpdate};
pub use events::{EventRecord, EventRepository};

use evchan_proto::Snowflake;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    /// A row with the same primary key already exists.
    #[error("already exists: {0}")]
    UniqueConflict(String),
    #[error("corrupt {column} value: {value:?}")]
    InvalidId { column: &'static str, value: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn is_unique_conflict(&self) -> bool {
        matches!(self, Self::UniqueConflict(_))
    }

    /// Map an insert failure, turning UNIQUE violations into [`DbError::UniqueConflict`].
    pub(crate) fn from_insert(err: sqlx::Error, key: impl FnOnce() -> String) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return DbError::UniqueConflict(key());
        }
        DbError::from(err)
    }
}

/// Parse a stored snowflake column.
pub(crate) fn parse_id(column: &'static str, value: String) -> Result<Snowflake, DbError> {
    value
        .parse()
        .map_err(|_| DbError::InvalidId { column, value })
}

/// Parse a nullable stored snowflake column.
pub(crate) fn parse_opt_id(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<Snowflake>, DbError> {
    value.map(|v| parse_id(column, v)).transpose()
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // Uniquely named shared-cache memory database per call so parallel
            // tests never see each other's rows.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:evchan-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .foreign_keys(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            // WAL lets the reconciler read while handlers write.
            let options = SqliteConnectOptions::new()
                .filename(path)
                .foreign_keys(true)
                .journal_mode(SqliteJournalMode::Wal)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        let integrity_result: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;

        if integrity_result != "ok" {
            tracing::error!(
                integrity_check = %integrity_result,
                "Database integrity check FAILED - corruption detected!"
            );
            return Err(DbError::Internal(format!(
                "integrity check failed: {integrity_result}"
            )));
        }

        Ok(Self { pool })
    }

    /// Run embedded migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::Migration)?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Get community repository.
    pub fn communities(&self) -> CommunityRepository<'_> {
        CommunityRepository::new(&self.pool)
    }

    /// Get event repository.
    pub fn events(&self) -> EventRepository<'_> {
        EventRepository::new(&self.pool)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("evchan.db");
        let path = path.to_str().unwrap();

        let db = Database::new(path).await.unwrap();
        let record = CommunityRecord::new(Snowflake::new(1), "`%EVENT%`".to_string(), None);
        db.communities().insert(&record).await.unwrap();
        drop(db);

        let db = Database::new(path).await.unwrap();
        assert!(db.communities().find(Snowflake::new(1)).await.unwrap().is_some());
    }

    #[test]
    fn corrupt_ids_are_reported() {
        let err = parse_id("channel_id", "general".to_string()).unwrap_err();
        assert!(matches!(err, DbError::InvalidId { column: "channel_id", .. }));
        assert_eq!(parse_opt_id("role_id", None).unwrap(), None);
    }
}
