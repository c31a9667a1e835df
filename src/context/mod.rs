//! Context assembly.
//!
//! Given one correspondent's unanswered batch and a parsed retrieval
//! configuration, produce the ordered context fragments that precede the
//! model prompt: time-bucketed summaries, same-day traffic, similarity
//! matches, then the batch itself as the active user turn.
//!
//! Every retrieval sub-step is fallible in isolation: a failed step logs
//! and contributes nothing. Assembly always produces some context; it never
//! aborts the reply pipeline.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::command::{ContextConfig, strip_directives, strip_reasoning};
use crate::model::EmbeddingModel;
use crate::similarity::{Scored, cosine, rank_top_k};
use crate::store::correspondents::Correspondent;
use crate::store::embeddings::{self, CandidateKind, EmbeddingCandidate};
use crate::store::memories::{self, MemoryKind};
use crate::store::messages::{self, MessageRow};
use crate::types::{ContextFragment, FragmentOrigin};

pub struct ContextAssembler<'a> {
    pool: &'a SqlitePool,
    embedder: &'a dyn EmbeddingModel,
    /// The assistant's own address; messages it sent render as assistant
    /// turns.
    assistant_address: &'a str,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        embedder: &'a dyn EmbeddingModel,
        assistant_address: &'a str,
    ) -> Self {
        Self {
            pool,
            embedder,
            assistant_address,
        }
    }

    /// Assemble context for one unanswered batch.
    pub async fn assemble(
        &self,
        correspondent: &Correspondent,
        batch: &[MessageRow],
        config: &ContextConfig,
    ) -> Vec<ContextFragment> {
        let mut fragments = Vec::new();

        let active_text = clean_batch_text(batch);

        if config.remember.enable {
            self.push_memories(correspondent, config, &mut fragments)
                .await;
        }

        if config.remember.today_emails {
            self.push_same_day_messages(correspondent, batch, &mut fragments)
                .await;
        }

        if config.embeds.enable {
            self.push_similarity_matches(correspondent, batch, &active_text, config, &mut fragments)
                .await;
        }

        fragments.push(ContextFragment::new(FragmentOrigin::ActiveRequest, active_text));
        fragments
    }

    /// Step 1: most-recent memories per kind, newest first, as labeled
    /// blocks.
    async fn push_memories(
        &self,
        correspondent: &Correspondent,
        config: &ContextConfig,
        fragments: &mut Vec<ContextFragment>,
    ) {
        let filters = &config.remember.time_filters;
        let limits = [
            (MemoryKind::Daily, filters.daily),
            (MemoryKind::Weekly, filters.weekly),
            (MemoryKind::Monthly, filters.monthly),
            (MemoryKind::Quarterly, filters.quarterly),
        ];

        for (kind, limit) in limits {
            if limit == 0 {
                continue;
            }
            match memories::recent_by_kind(self.pool, correspondent.id, kind, limit).await {
                Ok(rows) => {
                    for row in rows {
                        fragments.push(ContextFragment::new(
                            FragmentOrigin::MemorySummary {
                                kind,
                                period_start: row.period_start,
                                period_end: row.period_end,
                            },
                            format_memory_block(kind, row.period_start, row.period_end, &row.text),
                        ));
                    }
                }
                Err(err) => {
                    warn!(
                        kind = kind.as_str(),
                        error = %err,
                        "could not retrieve memories, continuing without them"
                    );
                }
            }
        }
    }

    /// Step 2: already-answered messages from the calendar span covering
    /// the batch, as alternating turns by direction.
    async fn push_same_day_messages(
        &self,
        correspondent: &Correspondent,
        batch: &[MessageRow],
        fragments: &mut Vec<ContextFragment>,
    ) {
        let Some((start, end)) = batch_day_span(batch) else {
            return;
        };

        match messages::responded_in_span(self.pool, correspondent.id, start, end).await {
            Ok(rows) => {
                for row in rows {
                    let from_assistant = row.from_addr == self.assistant_address;
                    fragments.push(ContextFragment::new(
                        FragmentOrigin::TodayMessage { from_assistant },
                        strip_reasoning(&strip_directives(&row.body)),
                    ));
                }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    "could not retrieve same-day messages, continuing without them"
                );
            }
        }
    }

    /// Step 3: top-k embedding matches over stored messages and memories,
    /// excluding the batch being answered.
    async fn push_similarity_matches(
        &self,
        correspondent: &Correspondent,
        batch: &[MessageRow],
        active_text: &str,
        config: &ContextConfig,
        fragments: &mut Vec<ContextFragment>,
    ) {
        if active_text.is_empty() {
            return;
        }

        let query = match self.embedder.embed("Current Email", active_text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "could not embed batch, skipping similarity retrieval");
                return;
            }
        };

        let candidates = match self.collect_candidates(correspondent, batch).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "could not scan embeddings, skipping similarity retrieval");
                return;
            }
        };

        let scored = candidates
            .into_iter()
            .map(|candidate| Scored {
                score: cosine(&query, &candidate.vector),
                created_at: candidate.created_at,
                item: candidate,
            })
            .collect();

        for scored in rank_top_k(scored, config.embeds.topk) {
            let candidate = scored.item;
            fragments.push(ContextFragment::new(
                FragmentOrigin::SimilarityMatch {
                    created_at: candidate.created_at,
                },
                format_match_block(&candidate),
            ));
        }
    }

    async fn collect_candidates(
        &self,
        correspondent: &Correspondent,
        batch: &[MessageRow],
    ) -> crate::store::Result<Vec<EmbeddingCandidate>> {
        let model = self.embedder.model_name();
        let batch_ids: Vec<i64> = batch.iter().map(|m| m.id).collect();

        let mut candidates =
            embeddings::message_candidates(self.pool, correspondent.id, model).await?;
        candidates.retain(|c| !batch_ids.contains(&c.source_id));

        candidates
            .extend(embeddings::memory_candidates(self.pool, correspondent.id, model).await?);
        Ok(candidates)
    }
}

/// The batch bodies, directive- and reasoning-stripped, joined into the
/// text the model answers.
fn clean_batch_text(batch: &[MessageRow]) -> String {
    let joined = batch
        .iter()
        .map(|m| m.body.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    strip_reasoning(&strip_directives(&joined))
}

/// Calendar span [first day 00:00, last day 24:00) covering the batch.
fn batch_day_span(batch: &[MessageRow]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let first = batch.iter().map(|m| m.received_at).min()?;
    let last = batch.iter().map(|m| m.received_at).max()?;

    let start = first.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
    let end = (last.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)?
        .and_utc();
    Some((start, end))
}

fn format_memory_block(
    kind: MemoryKind,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    text: &str,
) -> String {
    format!(
        "[{} SUMMARY {} - {}]\n{}",
        kind.label(),
        period_start.format("%Y-%m-%d"),
        period_end.format("%Y-%m-%d"),
        strip_reasoning(text)
    )
}

fn format_match_block(candidate: &EmbeddingCandidate) -> String {
    let label = match candidate.kind {
        CandidateKind::Message => "RELEVANT MESSAGE",
        CandidateKind::Memory => "PAST MEMORY",
    };
    format!(
        "[{} from {}]\n{}",
        label,
        candidate.created_at.format("%Y-%m-%d"),
        strip_reasoning(&strip_directives(&candidate.text))
    )
}
