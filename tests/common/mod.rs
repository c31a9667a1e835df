#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use epistle::mail::{HistoryDirection, MailTransport, OutboundMail, RawMail};
use epistle::model::{ChatModel, EmbeddingModel, ModelError};
use epistle::types::ChatMessage;

/// Embedder with rule-based vectors: the first rule whose key appears in
/// the text wins, otherwise the default vector is returned.
pub struct MockEmbedder {
    rules: Vec<(String, Vec<f32>)>,
    default: Vec<f32>,
}

impl MockEmbedder {
    pub fn uniform(dim: usize) -> Self {
        Self {
            rules: Vec::new(),
            default: vec![1.0; dim],
        }
    }

    pub fn with_rule(mut self, key: &str, vector: Vec<f32>) -> Self {
        self.rules.push((key.to_string(), vector));
        self
    }
}

#[async_trait]
impl EmbeddingModel for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embed"
    }

    async fn embed(&self, label: &str, text: &str) -> Result<Vec<f32>, ModelError> {
        for (key, vector) in &self.rules {
            if text.contains(key.as_str()) || label.contains(key.as_str()) {
                return Ok(vector.clone());
            }
        }
        Ok(self.default.clone())
    }
}

/// Chat model returning a canned response, or failing when none is set.
/// Every received history is recorded for inspection.
pub struct MockChat {
    pub response: Option<String>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChat {
    pub fn replying(text: &str) -> Self {
        Self {
            response: Some(text.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(&self, history: &[ChatMessage]) -> Result<String, ModelError> {
        self.seen
            .lock()
            .expect("seen lock")
            .push(history.to_vec());
        match &self.response {
            Some(text) => Ok(text.clone()),
            None => Err(ModelError::Api {
                status: 500,
                message: "mock failure".into(),
            }),
        }
    }
}

/// Transport serving a scripted inbox and recording every side effect.
pub struct MockTransport {
    pub inbox: Mutex<Vec<RawMail>>,
    pub sent: Mutex<Vec<OutboundMail>>,
    pub seen: Mutex<Vec<u32>>,
    pub fail_send: bool,
}

impl MockTransport {
    pub fn empty() -> Self {
        Self {
            inbox: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            fail_send: false,
        }
    }

    pub fn with_inbox(mails: Vec<RawMail>) -> Self {
        Self {
            inbox: Mutex::new(mails),
            ..Self::empty()
        }
    }

    pub fn failing_send() -> Self {
        Self {
            fail_send: true,
            ..Self::empty()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn fetch_unseen(
        &self,
        _mailbox: &str,
        from_filter: &str,
    ) -> anyhow::Result<Vec<RawMail>> {
        Ok(self
            .inbox
            .lock()
            .expect("inbox lock")
            .iter()
            .filter(|m| m.from_addr == from_filter)
            .cloned()
            .collect())
    }

    async fn fetch_history(
        &self,
        _mailbox: &str,
        address: &str,
        direction: HistoryDirection,
    ) -> anyhow::Result<Vec<RawMail>> {
        Ok(self
            .inbox
            .lock()
            .expect("inbox lock")
            .iter()
            .filter(|m| match direction {
                HistoryDirection::From => m.from_addr == address,
                HistoryDirection::To => m.to_addr == address,
            })
            .cloned()
            .collect())
    }

    async fn mark_seen(&self, _mailbox: &str, uid: u32) -> anyhow::Result<()> {
        self.seen.lock().expect("seen lock").push(uid);
        Ok(())
    }

    async fn send(&self, mail: &OutboundMail) -> anyhow::Result<()> {
        if self.fail_send {
            anyhow::bail!("mock SMTP outage");
        }
        self.sent.lock().expect("sent lock").push(mail.clone());
        Ok(())
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn raw_mail(uid: u32, from: &str, subject: &str, body: &str, date: DateTime<Utc>) -> RawMail {
    RawMail {
        uid,
        external_id: format!("<msg-{uid}@client.example>"),
        in_reply_to: None,
        references: None,
        to_addr: "bot@assistant.example".to_string(),
        to_name: "Assistant".to_string(),
        from_addr: from.to_string(),
        from_name: "Client".to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        date,
    }
}
