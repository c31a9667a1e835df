//! IMAP/SMTP implementation of the transport contract.
//!
//! One cached IMAP session guarded by a NOOP liveness probe: when the probe
//! fails the session is dropped and a fresh login happens transparently.
//! Duplicate delivery across reconnects is harmless because ingestion is
//! idempotent on Message-ID.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mail_parser::MessageParser;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    HistoryDirection, MailTransport, OutboundMail, RawMail, ensure_brackets, make_message_id,
    strip_quoted_reply,
};
use crate::config::MailConfig;

type ImapSession = async_imap::Session<async_native_tls::TlsStream<TcpStream>>;

pub struct MailSession {
    config: MailConfig,
    password: String,
    imap: Mutex<Option<ImapSession>>,
    smtp: AsyncSmtpTransport<Tokio1Executor>,
}

impl MailSession {
    pub fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let password = config
            .password
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no mail password configured. Run `epistle auth mail`."))?;

        let credentials = Credentials::new(config.address.clone(), password.clone());
        let smtp = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            config: config.clone(),
            password,
            imap: Mutex::new(None),
            smtp,
        })
    }

    async fn connect(&self) -> anyhow::Result<ImapSession> {
        debug!(host = %self.config.imap_host, "connecting to IMAP");
        let tcp =
            TcpStream::connect((self.config.imap_host.as_str(), self.config.imap_port)).await?;
        let tls = async_native_tls::TlsConnector::new();
        let stream = tls.connect(self.config.imap_host.as_str(), tcp).await?;

        let client = async_imap::Client::new(stream);
        let session = client
            .login(&self.config.address, &self.password)
            .await
            .map_err(|(err, _)| anyhow::anyhow!("IMAP login failed: {err}"))?;
        info!(host = %self.config.imap_host, "logged in to IMAP");
        Ok(session)
    }

    /// NOOP-probe the cached session; on failure drop it and log in again.
    async fn ensure_session(&self, guard: &mut Option<ImapSession>) -> anyhow::Result<()> {
        if let Some(session) = guard.as_mut() {
            if session.noop().await.is_ok() {
                return Ok(());
            }
            warn!("IMAP liveness probe failed, reconnecting");
            *guard = None;
        }

        *guard = Some(self.connect().await?);
        Ok(())
    }

    async fn search_and_fetch(
        &self,
        mailbox: &str,
        criteria: &str,
    ) -> anyhow::Result<Vec<RawMail>> {
        let mut guard = self.imap.lock().await;
        self.ensure_session(&mut guard).await?;
        let Some(session) = guard.as_mut() else {
            anyhow::bail!("IMAP session unavailable");
        };
        session.select(mailbox).await?;

        let uids = session.uid_search(criteria).await?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted: Vec<u32> = uids.into_iter().collect();
        sorted.sort_unstable();
        let set = sorted
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        debug!(mailbox = %mailbox, count = sorted.len(), "fetching messages");

        let fetches: Vec<_> = session
            .uid_fetch(&set, "RFC822")
            .await?
            .try_collect()
            .await?;

        let mut mails = Vec::new();
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let Some(raw) = fetch.body() else {
                warn!(uid, "fetched message has no body section, skipping");
                continue;
            };
            match parse_raw(uid, raw) {
                Ok(mail) => mails.push(mail),
                // One undecodable message must not sink the batch.
                Err(err) => warn!(uid, error = %err, "could not decode message, skipping"),
            }
        }

        mails.sort_by_key(|mail| mail.uid);
        Ok(mails)
    }
}

#[async_trait]
impl MailTransport for MailSession {
    async fn fetch_unseen(
        &self,
        mailbox: &str,
        from_filter: &str,
    ) -> anyhow::Result<Vec<RawMail>> {
        self.search_and_fetch(mailbox, &format!("UNSEEN FROM \"{from_filter}\""))
            .await
    }

    async fn fetch_history(
        &self,
        mailbox: &str,
        address: &str,
        direction: HistoryDirection,
    ) -> anyhow::Result<Vec<RawMail>> {
        let criteria = match direction {
            HistoryDirection::From => format!("FROM \"{address}\""),
            HistoryDirection::To => format!("TO \"{address}\""),
        };
        self.search_and_fetch(mailbox, &criteria).await
    }

    async fn mark_seen(&self, mailbox: &str, uid: u32) -> anyhow::Result<()> {
        let mut guard = self.imap.lock().await;
        self.ensure_session(&mut guard).await?;
        let Some(session) = guard.as_mut() else {
            anyhow::bail!("IMAP session unavailable");
        };
        session.select(mailbox).await?;

        let responses: Vec<_> = session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await?
            .try_collect()
            .await?;
        drop(responses);
        debug!(uid, "marked seen");
        Ok(())
    }

    async fn send(&self, mail: &OutboundMail) -> anyhow::Result<()> {
        let from: Mailbox =
            format!("{} <{}>", self.config.display_name, self.config.address).parse()?;
        let to: Mailbox = format!("{} <{}>", mail.to_name, mail.to_addr)
            .parse()
            .or_else(|_| mail.to_addr.parse())?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .message_id(Some(mail.message_id.clone()));
        if let Some(parent) = &mail.in_reply_to {
            builder = builder.in_reply_to(parent.clone());
        }
        if let Some(references) = &mail.references {
            builder = builder.references(references.clone());
        }

        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())?;

        self.smtp.send(message).await?;
        info!(to = %mail.to_addr, subject = %mail.subject, "sent mail");
        Ok(())
    }
}

/// Decode a raw RFC822 message into the transport shape.
fn parse_raw(uid: u32, raw: &[u8]) -> anyhow::Result<RawMail> {
    let parser = MessageParser::default();
    let parsed = parser
        .parse(raw)
        .ok_or_else(|| anyhow::anyhow!("unparseable RFC822 payload"))?;

    let external_id = parsed
        .message_id()
        .map(ensure_brackets)
        .unwrap_or_else(|| make_message_id("missing-id.local"));

    let (from_name, from_addr) = address_pair(parsed.from());
    let (to_name, to_addr) = address_pair(parsed.to());

    let date = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let body = parsed
        .body_text(0)
        .map(|text| strip_quoted_reply(&text))
        .unwrap_or_default();

    Ok(RawMail {
        uid,
        external_id,
        in_reply_to: header_ids(&parsed, "In-Reply-To"),
        references: header_ids(&parsed, "References"),
        to_addr,
        to_name,
        from_addr,
        from_name,
        subject: parsed.subject().unwrap_or_default().to_string(),
        body,
        date,
    })
}

fn address_pair(address: Option<&mail_parser::Address<'_>>) -> (String, String) {
    let Some(first) = address.and_then(|a| a.first()) else {
        return (String::new(), String::new());
    };
    (
        first.name.as_deref().unwrap_or_default().to_string(),
        first.address.as_deref().unwrap_or_default().to_string(),
    )
}

/// Read a message-id header (In-Reply-To, References) as a normalized,
/// space-separated chain of angle-bracketed ids.
fn header_ids(parsed: &mail_parser::Message<'_>, name: &str) -> Option<String> {
    let value = parsed.header(name)?;

    let ids: Vec<String> = if let Some(text) = value.as_text() {
        text.split_whitespace().map(ensure_brackets).collect()
    } else if let Some(list) = value.as_text_list() {
        list.iter().map(|id| ensure_brackets(id)).collect()
    } else {
        return None;
    };

    if ids.is_empty() {
        None
    } else {
        Some(ids.join(" "))
    }
}
