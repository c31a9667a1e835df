//! Mail transport contract.
//!
//! The engines only ever see this trait and the two message shapes; the
//! IMAP/SMTP plumbing lives behind it in `session`.

pub mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// An inbound message, decoded to headers plus a plain-text body.
#[derive(Debug, Clone)]
pub struct RawMail {
    /// IMAP UID within the mailbox it was fetched from.
    pub uid: u32,
    /// RFC 5322 Message-ID, angle-bracketed.
    pub external_id: String,
    pub in_reply_to: Option<String>,
    /// Space-separated reference chain, angle-bracketed ids.
    pub references: Option<String>,
    pub to_addr: String,
    pub to_name: String,
    pub from_addr: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
    pub date: DateTime<Utc>,
}

/// An outbound message ready for submission.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to_addr: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

/// Which side of a historical conversation to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    /// Messages the correspondent sent us.
    From,
    /// Messages we sent the correspondent.
    To,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Unseen messages from one sender, oldest first.
    async fn fetch_unseen(&self, mailbox: &str, from_filter: &str)
    -> anyhow::Result<Vec<RawMail>>;

    /// Full history for one address in one mailbox, seen or not.
    async fn fetch_history(
        &self,
        mailbox: &str,
        address: &str,
        direction: HistoryDirection,
    ) -> anyhow::Result<Vec<RawMail>>;

    /// Flag a message as seen so it is not fetched again.
    async fn mark_seen(&self, mailbox: &str, uid: u32) -> anyhow::Result<()>;

    /// Submit an outbound message. Ok means the server accepted it.
    async fn send(&self, mail: &OutboundMail) -> anyhow::Result<()>;
}

/// Normalize a message id to its angle-bracketed form.
pub fn ensure_brackets(id: &str) -> String {
    let id = id.trim();
    if id.starts_with('<') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

/// Generate a fresh Message-ID under the given domain.
pub fn make_message_id(domain: &str) -> String {
    format!("<{}@{}>", uuid::Uuid::new_v4(), domain)
}

/// The domain part of an address, for Message-ID generation.
pub fn domain_of(address: &str) -> &str {
    address.rsplit('@').next().unwrap_or("localhost")
}

/// Drop quoted reply text: `>`-prefixed lines and the "On ... wrote:"
/// attribution above them. Stored bodies should carry only what the sender
/// actually wrote.
pub fn strip_quoted_reply(body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.starts_with("On ") && trimmed.trim_end().ends_with("wrote:") {
            continue;
        }
        kept.push(line);
    }
    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n").trim().to_string()
}
