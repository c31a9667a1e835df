use chrono::{DateTime, Utc};

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector has zero magnitude: an all-zero embedding
/// carries no signal, and "no similarity" is more useful to ranking than an
/// error. Dimension agreement is a caller precondition (embeddings are
/// versioned by model name, so mixed dimensions never reach this point).
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "embedding dimension mismatch");

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A similarity candidate scored against a query embedding.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub score: f32,
    pub created_at: DateTime<Utc>,
    pub item: T,
}

/// Select the top-k candidates by descending similarity, breaking ties by
/// most-recent first.
pub fn rank_top_k<T>(mut candidates: Vec<Scored<T>>, k: usize) -> Vec<Scored<T>> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cosine_is_symmetric() {
        let a = [1.0, 2.0, 3.0];
        let b = [-2.0, 0.5, 4.0];
        assert_eq!(cosine(&a, &b), cosine(&b, &a));
    }

    #[test]
    fn cosine_self_similarity_is_one() {
        let a = [0.3, -1.2, 2.5, 0.0];
        let sim = cosine(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let zero = [0.0, 0.0, 0.0];
        let a = [1.0, 2.0, 3.0];
        assert_eq!(cosine(&zero, &a), 0.0);
        assert_eq!(cosine(&a, &zero), 0.0);
    }

    #[test]
    fn rank_breaks_ties_by_recency() {
        let older = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let ranked = rank_top_k(
            vec![
                Scored {
                    score: 0.5,
                    created_at: older,
                    item: "old",
                },
                Scored {
                    score: 0.5,
                    created_at: newer,
                    item: "new",
                },
            ],
            1,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item, "new");
    }

    #[test]
    fn rank_orders_by_score_first() {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let ranked = rank_top_k(
            vec![
                Scored {
                    score: 0.2,
                    created_at: at,
                    item: "low",
                },
                Scored {
                    score: 0.9,
                    created_at: at,
                    item: "high",
                },
            ],
            2,
        );
        assert_eq!(ranked[0].item, "high");
        assert_eq!(ranked[1].item, "low");
    }
}
