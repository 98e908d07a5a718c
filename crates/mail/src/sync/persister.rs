//! Encrypted, conflict-skipping batch writes

use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;

use crate::crypto::FieldEncryptor;
use crate::models::{FetchedMessage, MessageRecord};
use crate::storage::MailStore;

/// What one `persist` call wrote
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistStats {
    /// Messages newly inserted
    pub inserted: usize,
    /// Messages skipped because they were already stored
    pub existing: usize,
    /// Storage transactions issued
    pub transactions: usize,
}

impl PersistStats {
    pub fn add(&mut self, other: PersistStats) {
        self.inserted += other.inserted;
        self.existing += other.existing;
        self.transactions += other.transactions;
    }
}

/// Writes decoded messages to the store
pub struct BatchPersister {
    store: Arc<dyn MailStore>,
    encryptor: Arc<dyn FieldEncryptor>,
    chunk_size: usize,
}

impl BatchPersister {
    pub fn new(
        store: Arc<dyn MailStore>,
        encryptor: Arc<dyn FieldEncryptor>,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            encryptor,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Encrypt and store `messages` for `user_id`
    ///
    /// Each chunk of `chunk_size` records is one transaction. Records that
    /// already exist are left untouched, so persisting the same messages
    /// twice is a no-op the second time. Any storage error is returned.
    pub fn persist(&self, user_id: i64, messages: &[FetchedMessage]) -> Result<PersistStats> {
        let mut stats = PersistStats::default();
        if messages.is_empty() {
            return Ok(stats);
        }

        let records = messages
            .iter()
            .map(|msg| self.encrypt_record(user_id, msg))
            .collect::<Result<Vec<_>>>()?;

        for chunk in records.chunks(self.chunk_size) {
            let inserted = self
                .store
                .insert_messages(chunk)
                .with_context(|| format!("Failed to store {} messages", chunk.len()))?;
            stats.add(PersistStats {
                inserted,
                existing: chunk.len() - inserted,
                transactions: 1,
            });
        }

        debug!(
            "[STORE] user {}: {} inserted, {} already present",
            user_id, stats.inserted, stats.existing
        );
        Ok(stats)
    }

    fn encrypt_record(&self, user_id: i64, msg: &FetchedMessage) -> Result<MessageRecord> {
        let encrypt = |field: &str, value: &str| {
            self.encryptor
                .encrypt(value)
                .with_context(|| format!("Failed to encrypt {} of message {}", field, msg.id))
        };

        Ok(MessageRecord {
            id: msg.id.clone(),
            thread_id: msg.thread_id.clone(),
            user_id,
            from: msg.from.clone(),
            to: msg.to.clone(),
            subject_enc: encrypt("subject", &msg.subject)?,
            body_enc: encrypt("body", &msg.body)?,
            snippet_enc: encrypt("snippet", &msg.snippet)?,
            is_read: msg.is_read,
            is_starred: msg.is_starred,
            label_ids: msg.label_ids.clone(),
            internal_date: msg.internal_date,
        })
    }
}
