//! Message repository.
//!
//! `external_id` (the RFC 5322 Message-ID) is the ingestion idempotency
//! key: inserting the same id twice is a no-op. The `responded` flag flips
//! 0 -> 1 exactly once, strictly after a reply has been dispatched.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use super::Result;
use super::embeddings::encode_vector;

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub correspondent_id: i64,
    pub thread_key: Option<String>,
    pub external_id: String,
    pub in_reply_to: Option<String>,
    pub to_addr: String,
    pub to_name: String,
    pub from_addr: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub responded: bool,
}

/// A message to be inserted, together with everything needed to thread it.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub correspondent_id: i64,
    pub thread_key: Option<String>,
    pub external_id: String,
    pub in_reply_to: Option<String>,
    pub to_addr: String,
    pub to_name: String,
    pub from_addr: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub responded: bool,
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// A row with the same external_id already existed; its id is returned.
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match *self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => id,
        }
    }
}

const SELECT_COLUMNS: &str = "id, correspondent_id, thread_key, external_id, in_reply_to, \
     to_addr, to_name, from_addr, from_name, subject, body, received_at, responded";

pub async fn find_by_external_id(
    pool: &SqlitePool,
    external_id: &str,
) -> Result<Option<MessageRow>> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages WHERE external_id = ?"
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert a message and its embedding atomically.
///
/// The embedding is created in the same transaction as the message it
/// describes: a message stored without its vector would silently corrupt
/// similarity search. Re-inserting an existing external_id changes nothing
/// and reports `Duplicate`.
pub async fn insert_with_embedding(
    pool: &SqlitePool,
    message: &NewMessage,
    model_name: &str,
    vector: &[f32],
) -> Result<InsertOutcome> {
    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM messages WHERE external_id = ?")
        .bind(&message.external_id)
        .fetch_optional(&mut *tx)
        .await?;
    if let Some((id,)) = existing {
        tx.rollback().await?;
        debug!(external_id = %message.external_id, "message already stored");
        return Ok(InsertOutcome::Duplicate(id));
    }

    let message_id = sqlx::query(
        "INSERT INTO messages \
           (correspondent_id, thread_key, external_id, in_reply_to, to_addr, to_name, \
            from_addr, from_name, subject, body, received_at, responded) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message.correspondent_id)
    .bind(&message.thread_key)
    .bind(&message.external_id)
    .bind(&message.in_reply_to)
    .bind(&message.to_addr)
    .bind(&message.to_name)
    .bind(&message.from_addr)
    .bind(&message.from_name)
    .bind(&message.subject)
    .bind(&message.body)
    .bind(message.received_at)
    .bind(message.responded)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    sqlx::query(
        "INSERT INTO message_embeddings (message_id, correspondent_id, model_name, vector) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(message.correspondent_id)
    .bind(model_name)
    .bind(encode_vector(vector))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(InsertOutcome::Inserted(message_id))
}

/// All unanswered messages for a correspondent, in arrival order.
pub async fn unresponded_for(
    pool: &SqlitePool,
    correspondent_id: i64,
) -> Result<Vec<MessageRow>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages \
         WHERE correspondent_id = ? AND responded = 0 \
         ORDER BY received_at, id"
    ))
    .bind(correspondent_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Already-answered messages for a correspondent within [start, end).
pub async fn responded_in_span(
    pool: &SqlitePool,
    correspondent_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<MessageRow>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages \
         WHERE correspondent_id = ? AND responded = 1 \
           AND received_at >= ? AND received_at < ? \
         ORDER BY received_at, id"
    ))
    .bind(correspondent_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All messages for a correspondent within [start, end), both directions.
pub async fn in_span(
    pool: &SqlitePool,
    correspondent_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<MessageRow>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages \
         WHERE correspondent_id = ? AND received_at >= ? AND received_at < ? \
         ORDER BY received_at, id"
    ))
    .bind(correspondent_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Earliest and latest arrival times for a correspondent, if any messages
/// exist.
pub async fn received_extent(
    pool: &SqlitePool,
    correspondent_id: i64,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
        "SELECT MIN(received_at), MAX(received_at) FROM messages WHERE correspondent_id = ?",
    )
    .bind(correspondent_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some((Some(min), Some(max))) => Some((min, max)),
        _ => None,
    })
}

/// Total number of stored messages.
pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Flip `responded` to 1 for the whole batch in one transaction.
pub async fn mark_responded(pool: &SqlitePool, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for id in ids {
        sqlx::query("UPDATE messages SET responded = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    debug!(count = ids.len(), "marked messages responded");
    Ok(())
}
