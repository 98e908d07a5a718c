//! In-memory storage implementation
//!
//! Used for tests and for embedding the sync engine without a database.

use anyhow::{Result, anyhow};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::MailStore;
use crate::models::{Account, MessageId, MessageRecord, SyncCheckpoint, ThreadId};

/// In-memory implementation of MailStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access. A message
/// batch is applied under one write lock, which stands in for a transaction.
pub struct InMemoryMailStore {
    accounts: RwLock<HashMap<i64, Account>>,
    sessions: RwLock<HashMap<String, i64>>,
    checkpoints: RwLock<HashMap<i64, SyncCheckpoint>>,
    threads: RwLock<HashSet<(i64, ThreadId)>>,
    messages: RwLock<HashMap<(i64, MessageId), MessageRecord>>,
    transactions: AtomicUsize,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashSet::new()),
            messages: RwLock::new(HashMap::new()),
            transactions: AtomicUsize::new(0),
        }
    }

    /// Number of message transactions applied so far
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Number of distinct thread references stored for a user
    pub fn count_threads(&self, user_id: i64) -> usize {
        self.threads
            .read()
            .map(|t| t.iter().filter(|(uid, _)| *uid == user_id).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("[STORE] in-memory lock poisoned")
}

impl MailStore for InMemoryMailStore {
    fn get_account(&self, user_id: i64) -> Result<Option<Account>> {
        Ok(self.accounts.read().map_err(poisoned)?.get(&user_id).cloned())
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .map_err(poisoned)?
            .insert(account.id, account.clone());
        Ok(())
    }

    fn find_session_user(&self, token: &str) -> Result<Option<i64>> {
        Ok(self.sessions.read().map_err(poisoned)?.get(token).copied())
    }

    fn save_session(&self, token: &str, user_id: i64) -> Result<()> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(token.to_string(), user_id);
        Ok(())
    }

    fn get_checkpoint(&self, user_id: i64) -> Result<Option<SyncCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .map_err(poisoned)?
            .get(&user_id)
            .cloned())
    }

    fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        self.checkpoints
            .write()
            .map_err(poisoned)?
            .insert(checkpoint.user_id, checkpoint.clone());
        Ok(())
    }

    fn insert_messages(&self, records: &[MessageRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut threads = self.threads.write().map_err(poisoned)?;
        let mut messages = self.messages.write().map_err(poisoned)?;
        self.transactions.fetch_add(1, Ordering::SeqCst);

        for record in records {
            threads.insert((record.user_id, record.thread_id.clone()));
        }

        let mut inserted = 0;
        for record in records {
            let key = (record.user_id, record.id.clone());
            if messages.contains_key(&key) {
                continue;
            }
            messages.insert(key, record.clone());
            inserted += 1;
        }

        Ok(inserted)
    }

    fn get_message(&self, user_id: i64, id: &MessageId) -> Result<Option<MessageRecord>> {
        Ok(self
            .messages
            .read()
            .map_err(poisoned)?
            .get(&(user_id, id.clone()))
            .cloned())
    }

    fn has_message(&self, user_id: i64, id: &MessageId) -> Result<bool> {
        Ok(self
            .messages
            .read()
            .map_err(poisoned)?
            .contains_key(&(user_id, id.clone())))
    }

    fn count_messages(&self, user_id: i64) -> Result<usize> {
        Ok(self
            .messages
            .read()
            .map_err(poisoned)?
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .count())
    }
}
