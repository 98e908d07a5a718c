//! Scripted fakes for exercising the sync pipeline without a network

use anyhow::{Result, bail};
use base64::prelude::*;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::CancelToken;
use crate::gmail::api::{GmailMessage, Header, MessageBody, MessagePart};
use crate::gmail::{MailTransport, MessagePage, TransportError};
use crate::models::{Account, MessageId, MessageRecord, SyncCheckpoint};
use crate::storage::{InMemoryMailStore, MailStore};

pub fn message_id(index: usize) -> MessageId {
    MessageId::new(format!("m{:04}", index))
}

pub fn ids(range: Range<usize>) -> Vec<MessageId> {
    range.map(message_id).collect()
}

fn index_of(id: &MessageId) -> Option<usize> {
    id.as_str().strip_prefix('m')?.parse().ok()
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// A mailbox of `total` generated messages with configurable faults
///
/// Message `i` has id `m{i:04}`, lives in thread `t{i/2:04}` and carries
/// history id `1000 + i`. Even-numbered messages are unread.
pub struct ScriptedTransport {
    total: usize,
    page_size: Option<usize>,
    repeat_token: bool,
    listing_error: Option<TransportError>,
    cancel_after_pages: Option<(usize, CancelToken)>,
    failures: HashMap<String, TransportError>,
    malformed: HashSet<String>,
    no_history: HashSet<String>,
    panics: HashSet<String>,
    fail_first_gets: usize,
    hooks: HashMap<String, Hook>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn with_messages(total: usize) -> Self {
        Self {
            total,
            page_size: None,
            repeat_token: false,
            listing_error: None,
            cancel_after_pages: None,
            failures: HashMap::new(),
            malformed: HashSet::new(),
            no_history: HashSet::new(),
            panics: HashSet::new(),
            fail_first_gets: 0,
            hooks: HashMap::new(),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    /// Serve pages of this size regardless of what is requested
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Answer the last page with the token that requested it
    pub fn repeat_page_token(mut self) -> Self {
        self.repeat_token = true;
        self
    }

    pub fn fail_listing(mut self, error: TransportError) -> Self {
        self.listing_error = Some(error);
        self
    }

    /// Cancel `token` once `pages` listing pages have been served
    pub fn cancel_after_pages(mut self, pages: usize, token: CancelToken) -> Self {
        self.cancel_after_pages = Some((pages, token));
        self
    }

    pub fn fail_message(mut self, id: &str, error: TransportError) -> Self {
        self.failures.insert(id.to_string(), error);
        self
    }

    /// Serve this message without a payload
    pub fn malformed_message(mut self, id: &str) -> Self {
        self.malformed.insert(id.to_string());
        self
    }

    /// Serve these messages without a history id
    pub fn without_history_ids(mut self, range: Range<usize>) -> Self {
        self.no_history.extend(range.map(|i| message_id(i).0));
        self
    }

    pub fn panic_on(mut self, id: &str) -> Self {
        self.panics.insert(id.to_string());
        self
    }

    /// Fail the first `count` content requests with a network error
    pub fn fail_first_gets(mut self, count: usize) -> Self {
        self.fail_first_gets = count;
        self
    }

    /// Run `hook` whenever this message is requested
    pub fn on_get(mut self, id: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.insert(id.to_string(), Box::new(hook));
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn build_message(index: usize) -> GmailMessage {
        let header = |name: &str, value: String| Header {
            name: name.to_string(),
            value,
        };
        let mut label_ids = vec!["INBOX".to_string()];
        if index % 2 == 0 {
            label_ids.push("UNREAD".to_string());
        }

        GmailMessage {
            id: message_id(index).0,
            thread_id: format!("t{:04}", index / 2),
            label_ids: Some(label_ids),
            snippet: format!("Snippet {}", index),
            history_id: Some((1000 + index).to_string()),
            internal_date: (1_700_000_000_000i64 + index as i64 * 1000).to_string(),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                headers: Some(vec![
                    header("Subject", format!("Message {}", index)),
                    header("From", "sender@example.com".to_string()),
                    header("To", "me@example.com".to_string()),
                ]),
                parts: Some(vec![MessagePart {
                    mime_type: Some("text/plain".to_string()),
                    body: Some(MessageBody {
                        size: None,
                        data: Some(BASE64_URL_SAFE_NO_PAD.encode(format!("Body {}", index))),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }
}

impl MailTransport for ScriptedTransport {
    fn list_message_ids(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TransportError> {
        let served = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = &self.listing_error {
            return Err(e.clone());
        }

        let page_size = self.page_size.unwrap_or(page_size).max(1);
        let start = match page_token {
            Some(token) => token
                .strip_prefix('o')
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| TransportError::Http { status: 400 })?,
            None => 0,
        };
        let end = (start + page_size).min(self.total);

        let next_page_token = if end < self.total {
            Some(format!("o{}", end))
        } else if self.repeat_token {
            page_token.map(String::from)
        } else {
            None
        };

        if let Some((pages, token)) = &self.cancel_after_pages
            && served >= *pages
        {
            token.cancel();
        }

        Ok(MessagePage {
            ids: ids(start..end),
            next_page_token,
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, TransportError> {
        let call = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(hook) = self.hooks.get(id.as_str()) {
            hook();
        }
        if self.panics.contains(id.as_str()) {
            panic!("scripted panic for {}", id);
        }
        if call <= self.fail_first_gets {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        if let Some(e) = self.failures.get(id.as_str()) {
            return Err(e.clone());
        }

        let index = index_of(id)
            .filter(|i| *i < self.total)
            .ok_or_else(|| TransportError::NotFound(id.clone()))?;

        let mut msg = Self::build_message(index);
        if self.malformed.contains(id.as_str()) {
            msg.payload = None;
        }
        if self.no_history.contains(id.as_str()) {
            msg.history_id = None;
        }
        Ok(msg)
    }
}

/// An in-memory store whose message writes start failing after a quota
pub struct FailingStore {
    inner: InMemoryMailStore,
    ok_writes: usize,
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn after_writes(ok_writes: usize) -> Self {
        Self {
            inner: InMemoryMailStore::new(),
            ok_writes,
            writes: AtomicUsize::new(0),
        }
    }
}

impl MailStore for FailingStore {
    fn get_account(&self, user_id: i64) -> Result<Option<Account>> {
        self.inner.get_account(user_id)
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        self.inner.save_account(account)
    }

    fn find_session_user(&self, token: &str) -> Result<Option<i64>> {
        self.inner.find_session_user(token)
    }

    fn save_session(&self, token: &str, user_id: i64) -> Result<()> {
        self.inner.save_session(token, user_id)
    }

    fn get_checkpoint(&self, user_id: i64) -> Result<Option<SyncCheckpoint>> {
        self.inner.get_checkpoint(user_id)
    }

    fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        self.inner.save_checkpoint(checkpoint)
    }

    fn insert_messages(&self, records: &[MessageRecord]) -> Result<usize> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.ok_writes {
            bail!("disk I/O error");
        }
        self.inner.insert_messages(records)
    }

    fn get_message(&self, user_id: i64, id: &MessageId) -> Result<Option<MessageRecord>> {
        self.inner.get_message(user_id, id)
    }

    fn has_message(&self, user_id: i64, id: &MessageId) -> Result<bool> {
        self.inner.has_message(user_id, id)
    }

    fn count_messages(&self, user_id: i64) -> Result<usize> {
        self.inner.count_messages(user_id)
    }
}
