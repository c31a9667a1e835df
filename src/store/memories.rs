//! Memory repository.
//!
//! A memory is a model-generated narrative summary of one correspondent's
//! activity over one calendar period. At most one memory exists per
//! (correspondent, kind, period_start, period_end); summarization checks
//! for an existing row before generating, which makes it restartable.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use super::Result;
use super::embeddings::encode_vector;

/// Summary granularity, coarsest built from the next-finer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Daily => "daily",
            MemoryKind::Weekly => "weekly",
            MemoryKind::Monthly => "monthly",
            MemoryKind::Quarterly => "quarterly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(MemoryKind::Daily),
            "weekly" => Some(MemoryKind::Weekly),
            "monthly" => Some(MemoryKind::Monthly),
            "quarterly" => Some(MemoryKind::Quarterly),
            _ => None,
        }
    }

    /// Capitalized name for subject lines, e.g. `Daily`.
    pub fn title(&self) -> &'static str {
        match self {
            MemoryKind::Daily => "Daily",
            MemoryKind::Weekly => "Weekly",
            MemoryKind::Monthly => "Monthly",
            MemoryKind::Quarterly => "Quarterly",
        }
    }

    /// Label used in context blocks, e.g. `DAILY`.
    pub fn label(&self) -> &'static str {
        match self {
            MemoryKind::Daily => "DAILY",
            MemoryKind::Weekly => "WEEKLY",
            MemoryKind::Monthly => "MONTHLY",
            MemoryKind::Quarterly => "QUARTERLY",
        }
    }

    /// The granularity this kind summarizes over, if any. Daily summaries
    /// are built from raw messages instead.
    pub fn finer(&self) -> Option<MemoryKind> {
        match self {
            MemoryKind::Daily => None,
            MemoryKind::Weekly => Some(MemoryKind::Daily),
            MemoryKind::Monthly => Some(MemoryKind::Weekly),
            MemoryKind::Quarterly => Some(MemoryKind::Monthly),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MemoryRow {
    pub id: i64,
    pub correspondent_id: i64,
    pub kind: String,
    pub text: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMemory {
    pub correspondent_id: i64,
    pub kind: MemoryKind,
    pub text: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

const SELECT_COLUMNS: &str =
    "id, correspondent_id, kind, text, period_start, period_end, created_at";

/// Whether a memory already exists for this exact period tuple.
pub async fn exists_for_period(
    pool: &SqlitePool,
    correspondent_id: i64,
    kind: MemoryKind,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM memories \
         WHERE correspondent_id = ? AND kind = ? AND period_start = ? AND period_end = ?",
    )
    .bind(correspondent_id)
    .bind(kind.as_str())
    .bind(period_start)
    .bind(period_end)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Insert a memory and its embedding atomically.
pub async fn insert_with_embedding(
    pool: &SqlitePool,
    memory: &NewMemory,
    model_name: &str,
    vector: &[f32],
) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let memory_id = sqlx::query(
        "INSERT INTO memories (correspondent_id, kind, text, period_start, period_end, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(memory.correspondent_id)
    .bind(memory.kind.as_str())
    .bind(&memory.text)
    .bind(memory.period_start)
    .bind(memory.period_end)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    sqlx::query(
        "INSERT INTO memory_embeddings (memory_id, correspondent_id, model_name, vector) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(memory_id)
    .bind(memory.correspondent_id)
    .bind(model_name)
    .bind(encode_vector(vector))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(
        kind = memory.kind.as_str(),
        correspondent_id = memory.correspondent_id,
        "stored memory"
    );
    Ok(memory_id)
}

/// The most recent memories of one kind, newest first.
pub async fn recent_by_kind(
    pool: &SqlitePool,
    correspondent_id: i64,
    kind: MemoryKind,
    limit: u32,
) -> Result<Vec<MemoryRow>> {
    let rows = sqlx::query_as::<_, MemoryRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM memories \
         WHERE correspondent_id = ? AND kind = ? \
         ORDER BY period_start DESC, id DESC \
         LIMIT ?"
    ))
    .bind(correspondent_id)
    .bind(kind.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Memories of one kind fully contained in [start, end), oldest first.
/// Used to roll a finer granularity up into a coarser one.
pub async fn in_period_range(
    pool: &SqlitePool,
    correspondent_id: i64,
    kind: MemoryKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<MemoryRow>> {
    let rows = sqlx::query_as::<_, MemoryRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM memories \
         WHERE correspondent_id = ? AND kind = ? \
           AND period_start >= ? AND period_end <= ? \
         ORDER BY period_start, id"
    ))
    .bind(correspondent_id)
    .bind(kind.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// First period_start and last period_end of one kind, if any rows exist.
pub async fn period_extent(
    pool: &SqlitePool,
    correspondent_id: i64,
    kind: MemoryKind,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
        "SELECT MIN(period_start), MAX(period_end) FROM memories \
         WHERE correspondent_id = ? AND kind = ?",
    )
    .bind(correspondent_id)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some((Some(min), Some(max))) => Some((min, max)),
        _ => None,
    })
}

/// Total number of stored memories.
pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memories")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
