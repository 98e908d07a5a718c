//! Storage trait definitions

use crate::models::{Account, MessageId, MessageRecord, SyncCheckpoint};
use anyhow::Result;

/// Trait for mail storage operations
///
/// This trait abstracts over different storage backends (in-memory, database, etc.)
/// and provides what the sync pipeline and the daemon need.
pub trait MailStore: Send + Sync {
    // === Accounts and sessions ===

    /// Get the linked account for a user
    fn get_account(&self, user_id: i64) -> Result<Option<Account>>;

    /// Insert or update a linked account
    fn save_account(&self, account: &Account) -> Result<()>;

    /// Resolve a session token to its user
    fn find_session_user(&self, token: &str) -> Result<Option<i64>>;

    /// Register a session token for a user
    fn save_session(&self, token: &str, user_id: i64) -> Result<()>;

    // === Sync checkpoints ===

    /// Get the sync checkpoint for a user
    fn get_checkpoint(&self, user_id: i64) -> Result<Option<SyncCheckpoint>>;

    /// Save a sync checkpoint (upsert on user id)
    fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()>;

    // === Messages ===

    /// Insert records in a single transaction, skipping conflicts
    ///
    /// Thread references are written first, then messages and their labels.
    /// A record whose (user, message id) already exists is left untouched.
    /// Returns the number of messages that were newly inserted.
    fn insert_messages(&self, records: &[MessageRecord]) -> Result<usize>;

    /// Get a stored message
    fn get_message(&self, user_id: i64, id: &MessageId) -> Result<Option<MessageRecord>>;

    /// Check if a message exists
    fn has_message(&self, user_id: i64, id: &MessageId) -> Result<bool>;

    /// Count stored messages for a user
    fn count_messages(&self, user_id: i64) -> Result<usize>;
}
