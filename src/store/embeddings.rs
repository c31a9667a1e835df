//! Embedding storage and scanning.
//!
//! Vectors are stored as BLOBs of little-endian f32 values, versioned by
//! the embedding model's name so a model change never mixes dimensions.
//! Retrieval is an exact linear scan over one correspondent's rows; at the
//! expected corpus size an index would buy nothing.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use super::{Result, StoreError};

/// Encode a vector as a little-endian f32 blob.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob back into a vector.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::CorruptVector(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// What a stored embedding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Message,
    Memory,
}

/// One similarity candidate: the parent row's text and timestamp together
/// with its stored vector.
#[derive(Debug, Clone)]
pub struct EmbeddingCandidate {
    pub kind: CandidateKind,
    pub source_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub vector: Vec<f32>,
}

/// All message embeddings for a correspondent under one model version.
pub async fn message_candidates(
    pool: &SqlitePool,
    correspondent_id: i64,
    model_name: &str,
) -> Result<Vec<EmbeddingCandidate>> {
    let rows: Vec<(i64, String, DateTime<Utc>, Vec<u8>)> = sqlx::query_as(
        "SELECT m.id, m.body, m.received_at, e.vector \
         FROM message_embeddings e \
         JOIN messages m ON m.id = e.message_id \
         WHERE e.correspondent_id = ? AND e.model_name = ?",
    )
    .bind(correspondent_id)
    .bind(model_name)
    .fetch_all(pool)
    .await?;

    Ok(decode_candidates(rows, CandidateKind::Message))
}

/// All memory embeddings for a correspondent under one model version.
pub async fn memory_candidates(
    pool: &SqlitePool,
    correspondent_id: i64,
    model_name: &str,
) -> Result<Vec<EmbeddingCandidate>> {
    let rows: Vec<(i64, String, DateTime<Utc>, Vec<u8>)> = sqlx::query_as(
        "SELECT m.id, m.text, m.created_at, e.vector \
         FROM memory_embeddings e \
         JOIN memories m ON m.id = e.memory_id \
         WHERE e.correspondent_id = ? AND e.model_name = ?",
    )
    .bind(correspondent_id)
    .bind(model_name)
    .fetch_all(pool)
    .await?;

    Ok(decode_candidates(rows, CandidateKind::Memory))
}

fn decode_candidates(
    rows: Vec<(i64, String, DateTime<Utc>, Vec<u8>)>,
    kind: CandidateKind,
) -> Vec<EmbeddingCandidate> {
    rows.into_iter()
        .filter_map(|(source_id, text, created_at, blob)| match decode_vector(&blob) {
            Ok(vector) => Some(EmbeddingCandidate {
                kind,
                source_id,
                text,
                created_at,
                vector,
            }),
            Err(err) => {
                // A corrupt row degrades retrieval; it must not abort it.
                warn!(source_id, error = %err, "skipping undecodable embedding");
                None
            }
        })
        .collect()
}
