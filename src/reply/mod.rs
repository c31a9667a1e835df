//! Reply generation.
//!
//! Per correspondent: collect the unanswered batch, assemble context,
//! generate, persist the threaded reply plus its embedding in one
//! transaction, send, and only after the send is confirmed mark the batch
//! answered. A failure at any stage leaves the batch unanswered so the next
//! scheduler tick retries it; nothing is ever silently dropped.

use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::command;
use crate::config::MailConfig;
use crate::context::ContextAssembler;
use crate::mail::{MailTransport, OutboundMail, domain_of, make_message_id};
use crate::model::{ChatModel, EmbeddingModel};
use crate::store::correspondents::Correspondent;
use crate::store::messages::{self, NewMessage};
use crate::types::render_history;

const DEFAULT_REPLY_PROMPT: &str = "You are a considerate, precise email assistant replying on \
behalf of your operator. Context blocks above the conversation carry period summaries and \
relevant past exchanges; rely on them for continuity but never quote them verbatim. Write the \
reply body only, with no subject line and no signature.";

/// What one reply cycle did for a correspondent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing unanswered.
    Idle,
    /// Reply generated, sent, and the batch marked answered.
    Replied,
    /// Generation, persistence, or dispatch failed; the batch stays
    /// unanswered for the next tick.
    Aborted,
}

pub struct ReplyEngine<'a> {
    pool: &'a SqlitePool,
    chat: &'a dyn ChatModel,
    embedder: &'a dyn EmbeddingModel,
    transport: &'a dyn MailTransport,
    mail: &'a MailConfig,
    system_prompt: String,
}

impl<'a> ReplyEngine<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        chat: &'a dyn ChatModel,
        embedder: &'a dyn EmbeddingModel,
        transport: &'a dyn MailTransport,
        mail: &'a MailConfig,
        reply_prompt: Option<&str>,
    ) -> Self {
        Self {
            pool,
            chat,
            embedder,
            transport,
            mail,
            system_prompt: reply_prompt.unwrap_or(DEFAULT_REPLY_PROMPT).to_string(),
        }
    }

    /// Run one reply cycle for a correspondent.
    pub async fn run_cycle(&self, correspondent: &Correspondent) -> anyhow::Result<CycleOutcome> {
        let batch = messages::unresponded_for(self.pool, correspondent.id).await?;
        let Some(latest) = batch.last() else {
            return Ok(CycleOutcome::Idle);
        };
        info!(
            correspondent = %correspondent.address,
            count = batch.len(),
            "found unanswered messages"
        );

        // The newest message in the batch controls retrieval.
        let config = command::parse(&latest.body);

        let assembler = ContextAssembler::new(self.pool, self.embedder, &self.mail.address);
        let fragments = assembler.assemble(correspondent, &batch, &config).await;
        let history = render_history(&self.system_prompt, &fragments);

        info!(correspondent = %correspondent.address, "requesting reply from model");
        let output = match self.chat.complete(&history).await {
            Ok(text) => command::strip_reasoning(&text),
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "model call timed out, batch will be retried next tick");
                return Ok(CycleOutcome::Aborted);
            }
            Err(err) => {
                error!(error = %err, "model call failed, aborting this cycle");
                return Ok(CycleOutcome::Aborted);
            }
        };
        if output.is_empty() {
            warn!("model produced no usable text, aborting this cycle");
            return Ok(CycleOutcome::Aborted);
        }

        let message_id = make_message_id(domain_of(&self.mail.address));
        let references = extend_references(latest.thread_key.as_deref(), &latest.external_id);

        let reply = NewMessage {
            correspondent_id: correspondent.id,
            thread_key: Some(references.clone()),
            external_id: message_id.clone(),
            in_reply_to: Some(latest.external_id.clone()),
            to_addr: latest.from_addr.clone(),
            to_name: latest.from_name.clone(),
            from_addr: self.mail.address.clone(),
            from_name: self.mail.display_name.clone(),
            subject: latest.subject.clone(),
            body: output.clone(),
            received_at: chrono::Utc::now(),
            responded: true,
        };

        let vector = match self.embedder.embed(&latest.subject, &output).await {
            Ok(vector) => vector,
            Err(err) => {
                error!(error = %err, "could not embed reply, aborting this cycle");
                return Ok(CycleOutcome::Aborted);
            }
        };

        // Reply + embedding land together or not at all. On failure the
        // sources stay unanswered and the next tick starts over.
        messages::insert_with_embedding(self.pool, &reply, self.embedder.model_name(), &vector)
            .await?;

        let outbound = OutboundMail {
            to_addr: latest.from_addr.clone(),
            to_name: latest.from_name.clone(),
            subject: reply_subject(&latest.subject),
            body: output,
            message_id,
            in_reply_to: Some(latest.external_id.clone()),
            references: Some(references),
        };

        if let Err(err) = self.transport.send(&outbound).await {
            // The reply row exists but was never delivered. Marking the
            // sources now would lose their input forever, so they stay
            // unanswered and the next cycle regenerates.
            error!(error = %err, "send failed after persist, leaving batch unanswered");
            return Ok(CycleOutcome::Aborted);
        }

        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        messages::mark_responded(self.pool, &ids).await?;

        info!(
            correspondent = %correspondent.address,
            answered = ids.len(),
            "reply sent and batch marked answered"
        );
        Ok(CycleOutcome::Replied)
    }
}

/// Extend a reference chain with the parent id, if not already present.
fn extend_references(thread_key: Option<&str>, parent_id: &str) -> String {
    let mut ids: Vec<&str> = thread_key
        .map(|chain| chain.split_whitespace().collect())
        .unwrap_or_default();
    if !ids.contains(&parent_id) {
        ids.push(parent_id);
    }
    ids.join(" ")
}

fn reply_subject(subject: &str) -> String {
    if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}
