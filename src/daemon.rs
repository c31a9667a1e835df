//! The polling loop.
//!
//! One sequential worker: scan the mailbox, ingest, run a reply cycle per
//! correspondent, and once per day after the configured hour run the
//! summarization pass. No failure in one unit of work may abort the scan;
//! everything is retried on a later tick.

use chrono::{NaiveDate, Timelike, Utc};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::config::EpistleConfig;
use crate::ingest::Ingestor;
use crate::mail::MailTransport;
use crate::model::{ChatModel, EmbeddingModel};
use crate::reply::ReplyEngine;
use crate::store::correspondents;
use crate::summarize::Summarizer;

pub struct Daemon<'a> {
    config: &'a EpistleConfig,
    pool: &'a SqlitePool,
    chat: &'a dyn ChatModel,
    embedder: &'a dyn EmbeddingModel,
    transport: &'a dyn MailTransport,
}

impl<'a> Daemon<'a> {
    pub fn new(
        config: &'a EpistleConfig,
        pool: &'a SqlitePool,
        chat: &'a dyn ChatModel,
        embedder: &'a dyn EmbeddingModel,
        transport: &'a dyn MailTransport,
    ) -> Self {
        Self {
            config,
            pool,
            chat,
            embedder,
            transport,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let interval = std::time::Duration::from_secs(self.config.scheduler.poll_interval_secs);
        let mut last_summary_day: Option<NaiveDate> = None;

        info!(
            correspondents = self.config.mail.correspondents.len(),
            poll_interval_secs = self.config.scheduler.poll_interval_secs,
            "daemon started"
        );

        loop {
            self.tick(&mut last_summary_day).await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn tick(&self, last_summary_day: &mut Option<NaiveDate>) {
        let ingestor = Ingestor::new(self.pool, self.embedder, &self.config.mail);
        match ingestor.ingest_unseen(self.transport).await {
            Ok(0) => debug!("no new mail"),
            Ok(count) => info!(count, "ingested new mail"),
            Err(err) => warn!(error = %err, "ingestion pass failed, will retry next tick"),
        }

        let engine = ReplyEngine::new(
            self.pool,
            self.chat,
            self.embedder,
            self.transport,
            &self.config.mail,
            self.config.model.reply_prompt.as_deref(),
        );

        for configured in &self.config.mail.correspondents {
            let correspondent = match correspondents::get_or_create(
                self.pool,
                &configured.address,
                &configured.name,
            )
            .await
            {
                Ok(correspondent) => correspondent,
                Err(err) => {
                    error!(address = %configured.address, error = %err, "correspondent lookup failed");
                    continue;
                }
            };

            if let Err(err) = engine.run_cycle(&correspondent).await {
                // Isolation boundary: this correspondent waits for the
                // next tick, the others proceed.
                error!(
                    correspondent = %correspondent.address,
                    error = %err,
                    "reply cycle failed"
                );
            }
        }

        let now = Utc::now();
        let today = now.date_naive();
        let due = now.hour() >= self.config.scheduler.summary_hour
            && last_summary_day.is_none_or(|day| day < today);
        if due {
            info!("running scheduled summarization");
            let summarizer = Summarizer::new(
                self.pool,
                self.chat,
                self.embedder,
                self.transport,
                &self.config.mail,
                &self.config.summarizer,
                self.config.model.summary_prompt.as_deref(),
            );
            summarizer.run_enabled(self.config.summarizer.notify).await;
            *last_summary_day = Some(today);
        }
    }
}
