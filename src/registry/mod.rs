//! # Host Registry
//!
//! Durable mapping from hostname to the most recently enrolled public key.
//! Each hostname gets a stable, never reused, non-zero id on its first
//! enrollment; that id is the serial of every certificate issued for it.
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

/// Configuration types for the registry.
pub mod config;
use config::RegistryConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hostkeys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL UNIQUE,
    pubkey TEXT NOT NULL
)
"#;

/// A single enrolled host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub id: u64,
    pub hostname: String,
    /// Public key in authorized-keys form.
    pub pubkey: String,
}

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no record for host {0} after upsert")]
    MissingRecord(String),
    #[error("invalid id {0} stored in registry")]
    InvalidId(i64),
}

/// Storage of host records.
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Inserts or replaces the public key of `hostname` and returns the
    /// record id, read back after the write.
    async fn upsert(&self, hostname: &str, pubkey: &str) -> Result<u64, RegistryError>;
    /// Returns the record of `hostname`, if any.
    async fn lookup(&self, hostname: &str) -> Result<Option<HostRecord>, RegistryError>;
    /// Returns all records ordered by id.
    async fn list(&self) -> Result<Vec<HostRecord>, RegistryError>;
}

/// SQLite backed [`HostRegistry`].
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Opens or creates the registry database described by `config`.
    pub async fn open(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;
        debug!("opened host registry {:?}", config.database);
        Self::with_pool(pool).await
    }

    /// Opens a registry that lives in memory for as long as the value does.
    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self, RegistryError> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        // every connection would see its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, RegistryError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(SqliteRegistry { pool })
    }
}

fn record_id(id: i64) -> Result<u64, RegistryError> {
    match u64::try_from(id) {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(RegistryError::InvalidId(id)),
    }
}

fn record_from_row(row: &SqliteRow) -> Result<HostRecord, RegistryError> {
    Ok(HostRecord {
        id: record_id(row.try_get("id")?)?,
        hostname: row.try_get("hostname")?,
        pubkey: row.try_get("pubkey")?,
    })
}

#[async_trait]
impl HostRegistry for SqliteRegistry {
    async fn upsert(&self, hostname: &str, pubkey: &str) -> Result<u64, RegistryError> {
        let mut tx = self.pool.begin().await?;

        // the first statement writes, so the transaction holds the write lock
        // from here on and concurrent first enrollments of a host serialize
        let updated = sqlx::query("UPDATE hostkeys SET pubkey = ?1 WHERE hostname = ?2")
            .bind(pubkey)
            .bind(hostname)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            sqlx::query("INSERT INTO hostkeys (hostname, pubkey) VALUES (?1, ?2)")
                .bind(hostname)
                .bind(pubkey)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query("SELECT id FROM hostkeys WHERE hostname = ?1")
            .bind(hostname)
            .fetch_optional(&mut *tx)
            .await?;
        let id: i64 = match row {
            Some(row) => row.try_get("id")?,
            None => return Err(RegistryError::MissingRecord(hostname.to_string())),
        };

        tx.commit().await?;
        debug!(
            "{} host {} with id {}",
            if updated == 0 { "inserted" } else { "updated" },
            hostname,
            id
        );
        record_id(id)
    }

    async fn lookup(&self, hostname: &str) -> Result<Option<HostRecord>, RegistryError> {
        let row = sqlx::query("SELECT id, hostname, pubkey FROM hostkeys WHERE hostname = ?1")
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<HostRecord>, RegistryError> {
        let rows = sqlx::query("SELECT id, hostname, pubkey FROM hostkeys ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }
}
