//! Mail ingestion.
//!
//! Inbound messages become correspondent-owned rows plus embeddings,
//! idempotently: the Message-ID uniqueness check makes reprocessing a
//! no-op, so reconnects and restarts never duplicate. A message is flagged
//! seen on the server only after it is safely stored (or found stored
//! already); one malformed or failing message is skipped without sinking
//! the batch.

use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::command::strip_directives;
use crate::config::MailConfig;
use crate::mail::{HistoryDirection, MailTransport, RawMail};
use crate::model::EmbeddingModel;
use crate::store::correspondents;
use crate::store::messages::{self, InsertOutcome, NewMessage};

pub struct Ingestor<'a> {
    pool: &'a SqlitePool,
    embedder: &'a dyn EmbeddingModel,
    mail: &'a MailConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(pool: &'a SqlitePool, embedder: &'a dyn EmbeddingModel, mail: &'a MailConfig) -> Self {
        Self {
            pool,
            embedder,
            mail,
        }
    }

    /// Pull unseen mail from every configured correspondent and store it.
    /// Returns how many new messages were inserted.
    pub async fn ingest_unseen(&self, transport: &dyn MailTransport) -> anyhow::Result<usize> {
        let mut inserted = 0;

        for correspondent in &self.mail.correspondents {
            let mails = match transport
                .fetch_unseen(&self.mail.mailbox, &correspondent.address)
                .await
            {
                Ok(mails) => mails,
                Err(err) => {
                    // Transport trouble is transient; the next tick retries.
                    warn!(
                        correspondent = %correspondent.address,
                        error = %err,
                        "could not fetch unseen mail"
                    );
                    continue;
                }
            };

            if !mails.is_empty() {
                info!(
                    correspondent = %correspondent.address,
                    count = mails.len(),
                    "fetched unseen mail"
                );
            }

            for raw in &mails {
                match self.ingest_one(raw, false).await {
                    Ok(outcome) => {
                        if matches!(outcome, InsertOutcome::Inserted(_)) {
                            inserted += 1;
                        }
                        if let Err(err) = transport.mark_seen(&self.mail.mailbox, raw.uid).await {
                            warn!(uid = raw.uid, error = %err, "could not flag message seen");
                        }
                    }
                    Err(err) => {
                        // Left unseen on the server, so it is retried later.
                        error!(
                            external_id = %raw.external_id,
                            error = %err,
                            "could not store message, skipping"
                        );
                    }
                }
            }
        }

        Ok(inserted)
    }

    /// Store one decoded message with its embedding. `historical` marks
    /// backfilled mail as already answered, since old mail needs no reply.
    pub async fn ingest_one(
        &self,
        raw: &RawMail,
        historical: bool,
    ) -> anyhow::Result<InsertOutcome> {
        let from_assistant = raw.from_addr == self.mail.address;
        let (address, header_name) = if from_assistant {
            (&raw.to_addr, &raw.to_name)
        } else {
            (&raw.from_addr, &raw.from_name)
        };
        if address.is_empty() {
            anyhow::bail!("message {} has no usable correspondent address", raw.external_id);
        }

        // A configured display name wins over whatever the header carried.
        let display_name = self
            .mail
            .correspondents
            .iter()
            .find(|c| &c.address == address)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| header_name.clone());

        let correspondent =
            correspondents::get_or_create(self.pool, address, &display_name).await?;

        if let Some(existing) = messages::find_by_external_id(self.pool, &raw.external_id).await? {
            debug!(external_id = %raw.external_id, "message already stored");
            return Ok(InsertOutcome::Duplicate(existing.id));
        }

        let vector = self
            .embedder
            .embed(&raw.subject, &strip_directives(&raw.body))
            .await?;

        let message = NewMessage {
            correspondent_id: correspondent.id,
            thread_key: raw.references.clone(),
            external_id: raw.external_id.clone(),
            in_reply_to: raw.in_reply_to.clone(),
            to_addr: raw.to_addr.clone(),
            to_name: raw.to_name.clone(),
            from_addr: raw.from_addr.clone(),
            from_name: raw.from_name.clone(),
            subject: raw.subject.clone(),
            body: raw.body.clone(),
            received_at: raw.date,
            responded: historical || from_assistant,
        };

        let outcome = messages::insert_with_embedding(
            self.pool,
            &message,
            self.embedder.model_name(),
            &vector,
        )
        .await?;
        Ok(outcome)
    }

    /// Import the full conversation history with every configured
    /// correspondent: their mail from the inbox, ours from the sent
    /// mailbox, oldest first. Safe to re-run.
    pub async fn backfill(&self, transport: &dyn MailTransport) -> anyhow::Result<usize> {
        let mut all: Vec<RawMail> = Vec::new();

        for correspondent in &self.mail.correspondents {
            let sources = [
                (&self.mail.mailbox, HistoryDirection::From),
                (&self.mail.sent_mailbox, HistoryDirection::To),
            ];
            for (mailbox, direction) in sources {
                match transport
                    .fetch_history(mailbox, &correspondent.address, direction)
                    .await
                {
                    Ok(mails) => all.extend(mails),
                    Err(err) => {
                        warn!(
                            mailbox = %mailbox,
                            correspondent = %correspondent.address,
                            error = %err,
                            "could not fetch history"
                        );
                    }
                }
            }
        }

        info!(count = all.len(), "backfilling message history");
        all.sort_by_key(|m| m.date);

        let mut inserted = 0;
        for raw in &all {
            match self.ingest_one(raw, true).await {
                Ok(InsertOutcome::Inserted(_)) => inserted += 1,
                Ok(InsertOutcome::Duplicate(_)) => {}
                Err(err) => {
                    error!(external_id = %raw.external_id, error = %err, "skipping message");
                }
            }
        }

        info!(inserted, total = all.len(), "backfill finished");
        Ok(inserted)
    }
}
