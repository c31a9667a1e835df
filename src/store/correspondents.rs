//! Correspondent repository. A correspondent is created on first observed
//! message from or to its address and is immutable afterwards.

use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use super::Result;

#[derive(Debug, Clone, FromRow)]
pub struct Correspondent {
    pub id: i64,
    pub display_name: String,
    pub address: String,
}

/// Look up a correspondent by its unique address.
pub async fn find_by_address(pool: &SqlitePool, address: &str) -> Result<Option<Correspondent>> {
    let row = sqlx::query_as::<_, Correspondent>(
        "SELECT id, display_name, address FROM correspondents WHERE address = ?",
    )
    .bind(address)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch a correspondent by address, creating it if unseen.
pub async fn get_or_create(
    pool: &SqlitePool,
    address: &str,
    display_name: &str,
) -> Result<Correspondent> {
    if let Some(existing) = find_by_address(pool, address).await? {
        return Ok(existing);
    }

    debug!(address = %address, "creating correspondent");
    // ON CONFLICT guards against an insert racing another writer; the
    // first-written row wins and stays immutable.
    sqlx::query(
        "INSERT INTO correspondents (display_name, address) VALUES (?, ?)
         ON CONFLICT(address) DO NOTHING",
    )
    .bind(display_name)
    .bind(address)
    .execute(pool)
    .await?;

    let row = find_by_address(pool, address).await?;
    row.ok_or_else(|| super::StoreError::Database(sqlx::Error::RowNotFound))
}

/// All known correspondents, oldest first.
pub async fn all(pool: &SqlitePool) -> Result<Vec<Correspondent>> {
    let rows = sqlx::query_as::<_, Correspondent>(
        "SELECT id, display_name, address FROM correspondents ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
