//! SQLite persistence.
//!
//! Typed repository modules per entity over a shared `sqlx` pool. The data
//! model is an append-only log plus derived-artifact cache: nothing is
//! deleted in normal operation and only the `responded` flag ever mutates.
//! Every multi-row write (message + embedding, memory + embedding, batch
//! mark-responded) runs in a single transaction.

pub mod correspondents;
pub mod embeddings;
pub mod memories;
pub mod messages;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

pub use sqlx::SqlitePool;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt embedding blob: length {0} is not a multiple of 4")]
    CorruptVector(usize),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open the database pool, creating the file and parent directories if
/// needed, and apply the schema.
pub async fn open(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
        }
    }

    let options = SqliteConnectOptions::from_str(path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;
    info!(path = %path, "database opened");
    Ok(pool)
}

/// Open an in-memory database with the schema applied. A single connection
/// keeps the database alive for the pool's lifetime.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    apply_schema(&pool).await?;
    Ok(pool)
}

/// Apply the embedded schema. All statements carry IF NOT EXISTS guards,
/// so re-running is safe.
async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let schema = include_str!("../../schema.sql");

    for statement in schema.split(';') {
        let clean: String = statement
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean = clean.trim();
        if clean.is_empty() {
            continue;
        }
        sqlx::query(clean).execute(pool).await?;
    }

    Ok(())
}
