//! Periodic summarization.
//!
//! Walks calendar periods per (correspondent, kind) from the earliest to
//! the latest known activity, skipping any period that already has a
//! memory. Daily summaries compress raw messages; each coarser kind
//! compresses the next-finer memories. Existence is checked before
//! generation, so a crashed or repeated run never produces duplicates.

pub mod period;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::command::strip_reasoning;
use crate::config::{MailConfig, SummarizerConfig};
use crate::mail::{MailTransport, OutboundMail, domain_of, make_message_id};
use crate::model::{ChatModel, EmbeddingModel};
use crate::similarity::{Scored, cosine, rank_top_k};
use crate::store::correspondents::{self, Correspondent};
use crate::store::embeddings;
use crate::store::memories::{self, MemoryKind, NewMemory};
use crate::store::messages;
use crate::types::ChatMessage;
use period::walk_periods;

const DEFAULT_SUMMARY_PROMPT: &str = "You are maintaining a running memory of one email \
correspondent. Compress the material below into a concise narrative summary of the period: \
decisions made, questions still open, facts worth remembering. Prefer concrete details over \
pleasantries. Write plain prose, no headings.";

pub struct Summarizer<'a> {
    pool: &'a SqlitePool,
    chat: &'a dyn ChatModel,
    embedder: &'a dyn EmbeddingModel,
    transport: &'a dyn MailTransport,
    mail: &'a MailConfig,
    config: &'a SummarizerConfig,
    system_prompt: String,
}

impl<'a> Summarizer<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        chat: &'a dyn ChatModel,
        embedder: &'a dyn EmbeddingModel,
        transport: &'a dyn MailTransport,
        mail: &'a MailConfig,
        config: &'a SummarizerConfig,
        summary_prompt: Option<&str>,
    ) -> Self {
        Self {
            pool,
            chat,
            embedder,
            transport,
            mail,
            config,
            system_prompt: summary_prompt.unwrap_or(DEFAULT_SUMMARY_PROMPT).to_string(),
        }
    }

    /// Run every kind enabled in config, finest first so coarser rollups
    /// see fresh sources.
    pub async fn run_enabled(&self, notify: bool) {
        let kinds = [
            (MemoryKind::Daily, self.config.daily),
            (MemoryKind::Weekly, self.config.weekly),
            (MemoryKind::Monthly, self.config.monthly),
            (MemoryKind::Quarterly, self.config.quarterly),
        ];
        for (kind, enabled) in kinds {
            if !enabled {
                continue;
            }
            if let Err(err) = self.run_kind(kind, notify).await {
                error!(kind = kind.as_str(), error = %err, "summarization pass failed");
            }
        }
    }

    /// Summarize every outstanding period of one kind, for every
    /// correspondent.
    pub async fn run_kind(&self, kind: MemoryKind, notify: bool) -> anyhow::Result<()> {
        for correspondent in correspondents::all(self.pool).await? {
            if let Err(err) = self.run_for(&correspondent, kind, notify).await {
                // One correspondent's failure must not starve the rest.
                error!(
                    correspondent = %correspondent.address,
                    kind = kind.as_str(),
                    error = %err,
                    "summarization failed for correspondent"
                );
            }
        }
        Ok(())
    }

    async fn run_for(
        &self,
        correspondent: &Correspondent,
        kind: MemoryKind,
        notify: bool,
    ) -> anyhow::Result<()> {
        let extent = match kind.finer() {
            None => messages::received_extent(self.pool, correspondent.id).await?,
            Some(finer) => memories::period_extent(self.pool, correspondent.id, finer).await?,
        };
        let Some((earliest, latest)) = extent else {
            debug!(correspondent = %correspondent.address, "no activity to summarize");
            return Ok(());
        };

        for (start, end) in walk_periods(kind, earliest, latest, Utc::now()) {
            if memories::exists_for_period(self.pool, correspondent.id, kind, start, end).await? {
                debug!(
                    kind = kind.as_str(),
                    period_start = %start.format("%Y-%m-%d"),
                    "memory already exists, skipping period"
                );
                continue;
            }
            self.summarize_period(correspondent, kind, start, end, notify)
                .await?;
        }
        Ok(())
    }

    /// Summarize one period. Returns false when the period had no source
    /// data or generation failed; neither stops the walk.
    async fn summarize_period(
        &self,
        correspondent: &Correspondent,
        kind: MemoryKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notify: bool,
    ) -> anyhow::Result<bool> {
        let Some(narrative) = self.render_narrative(correspondent, kind, start, end).await? else {
            info!(
                kind = kind.as_str(),
                period_start = %start.format("%Y-%m-%d"),
                correspondent = %correspondent.address,
                "no data in period, skipping"
            );
            return Ok(false);
        };

        let past_blocks = self.relevant_past_memories(correspondent, &narrative).await;

        let mut content = format!("--- DATA FOR CURRENT PERIOD ---\n{narrative}");
        if !past_blocks.is_empty() {
            content.push_str("\n\n--- RELEVANT PAST MEMORIES FOR CONTEXT ---\n");
            content.push_str(&past_blocks.join("\n\n"));
        }

        let subject = summary_subject(kind, start, end);
        let system = format!(
            "{}\n\nCorrespondent: {}\nThis is a {} summary covering {} to {}.",
            self.system_prompt,
            correspondent.display_name,
            kind.as_str(),
            start.format("%Y-%m-%d"),
            (end - Duration::days(1)).format("%Y-%m-%d"),
        );
        let history = vec![ChatMessage::system(system), ChatMessage::user(content)];

        info!(
            kind = kind.as_str(),
            correspondent = %correspondent.address,
            "requesting summary from model"
        );
        let output = match self.chat.complete(&history).await {
            Ok(text) => strip_reasoning(&text),
            Err(err) => {
                warn!(error = %err, "summary generation failed, period left for next run");
                return Ok(false);
            }
        };
        if output.is_empty() {
            warn!("model produced no usable summary, period left for next run");
            return Ok(false);
        }

        // Embed subject and text together so period phrasing carries
        // semantic weight in later retrieval.
        let embedding_text = format!("Subject: {subject}\n\nSummary:\n{output}");
        let vector = match self.embedder.embed("Summary", &embedding_text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "summary embedding failed, period left for next run");
                return Ok(false);
            }
        };

        let memory = NewMemory {
            correspondent_id: correspondent.id,
            kind,
            text: output.clone(),
            period_start: start,
            period_end: end,
        };
        memories::insert_with_embedding(self.pool, &memory, self.embedder.model_name(), &vector)
            .await?;

        if notify {
            let outbound = OutboundMail {
                to_addr: correspondent.address.clone(),
                to_name: correspondent.display_name.clone(),
                subject,
                body: output,
                message_id: make_message_id(domain_of(&self.mail.address)),
                in_reply_to: None,
                references: None,
            };
            if let Err(err) = self.transport.send(&outbound).await {
                // The memory is stored either way; dispatch is best-effort.
                error!(error = %err, "could not send summary mail");
            }
        }

        Ok(true)
    }

    /// Render the period's source rows into a narrative, or None when the
    /// period is empty.
    async fn render_narrative(
        &self,
        correspondent: &Correspondent,
        kind: MemoryKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Option<String>> {
        let blocks: Vec<String> = match kind.finer() {
            None => {
                let rows = messages::in_span(self.pool, correspondent.id, start, end).await?;
                rows.iter()
                    .map(|m| {
                        format!(
                            "[EMAIL]\nFrom: {}\nTo: {}\nDate: {}\nSubject: {}\nBody:\n{}\n[/EMAIL]",
                            m.from_name,
                            m.to_name,
                            m.received_at.format("%Y-%m-%d %H:%M"),
                            m.subject,
                            m.body
                        )
                    })
                    .collect()
            }
            Some(finer) => {
                let rows =
                    memories::in_period_range(self.pool, correspondent.id, finer, start, end)
                        .await?;
                rows.iter()
                    .map(|m| {
                        format!(
                            "[SUMMARY FROM {}]\n{}\n[/SUMMARY]",
                            m.period_start.format("%Y-%m-%d"),
                            m.text
                        )
                    })
                    .collect()
            }
        };

        if blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(strip_reasoning(&blocks.join("\n\n"))))
    }

    /// Thematically relevant older memories, ranked by similarity against
    /// the period narrative. Failures degrade to no extra context.
    async fn relevant_past_memories(
        &self,
        correspondent: &Correspondent,
        narrative: &str,
    ) -> Vec<String> {
        let query = match self
            .embedder
            .embed("Current Period Summary", narrative)
            .await
        {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "could not embed narrative, skipping thematic retrieval");
                return Vec::new();
            }
        };

        let candidates = match embeddings::memory_candidates(
            self.pool,
            correspondent.id,
            self.embedder.model_name(),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "could not scan memory embeddings, skipping thematic retrieval");
                return Vec::new();
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

        rank_top_k(scored, self.config.relevant_topk)
            .into_iter()
            .map(|scored| {
                format!(
                    "[PAST MEMORY from {}]\n{}\n[/PAST MEMORY]",
                    scored.item.created_at.format("%Y-%m-%d"),
                    strip_reasoning(&scored.item.text)
                )
            })
            .collect()
    }
}

fn summary_subject(kind: MemoryKind, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    match kind {
        MemoryKind::Daily => format!("Daily summary - {}", start.format("%a, %d %B %Y")),
        _ => format!(
            "{} summary - {} to {}",
            kind.title(),
            start.format("%a, %d %B %Y"),
            (end - Duration::days(1)).format("%a, %d %B %Y"),
        ),
    }
}
