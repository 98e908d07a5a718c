//! Message models: decoded Gmail content and the encrypted stored record

use super::{LabelId, ThreadId};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message decoded from the Gmail API, still in plaintext
///
/// Produced by the content fetcher and consumed by the batch persister,
/// which encrypts the text fields into a [`MessageRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    /// Raw `From` header value
    pub from: String,
    /// Raw `To` header value
    pub to: String,
    pub subject: String,
    /// Best available body: HTML, then plain text, then the snippet
    pub body: String,
    pub snippet: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub label_ids: Vec<String>,
    /// Gmail's internal timestamp (milliseconds since epoch)
    pub internal_date: i64,
    /// Gmail historyId at the time this message was fetched
    pub history_id: Option<String>,
}

impl FetchedMessage {
    /// Create a new message builder
    pub fn builder(id: MessageId, thread_id: ThreadId) -> FetchedMessageBuilder {
        FetchedMessageBuilder::new(id, thread_id)
    }

    /// When the message was received, derived from the internal timestamp
    pub fn received_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.internal_date)
            .single()
            .unwrap_or_default()
    }
}

/// Builder for creating FetchedMessage instances
pub struct FetchedMessageBuilder {
    id: MessageId,
    thread_id: ThreadId,
    from: String,
    to: String,
    subject: String,
    body: String,
    snippet: String,
    label_ids: Vec<String>,
    internal_date: i64,
    history_id: Option<String>,
}

impl FetchedMessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            id,
            thread_id,
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            body: String::new(),
            snippet: String::new(),
            label_ids: Vec::new(),
            internal_date: 0,
            history_id: None,
        }
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.label_ids = label_ids;
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = internal_date;
        self
    }

    pub fn history_id(mut self, history_id: Option<String>) -> Self {
        self.history_id = history_id;
        self
    }

    pub fn build(self) -> FetchedMessage {
        FetchedMessage {
            is_read: LabelId::is_read(&self.label_ids),
            is_starred: LabelId::is_starred(&self.label_ids),
            id: self.id,
            thread_id: self.thread_id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            body: self.body,
            snippet: self.snippet,
            label_ids: self.label_ids,
            internal_date: self.internal_date,
            history_id: self.history_id,
        }
    }
}

/// A message as persisted: keyed by (message id, user id), with
/// subject/body/snippet held as encrypted envelopes.
///
/// Created exactly once per message per user and never rewritten by sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub user_id: i64,
    pub from: String,
    pub to: String,
    pub subject_enc: String,
    pub body_enc: String,
    pub snippet_enc: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub label_ids: Vec<String>,
    pub internal_date: i64,
}
