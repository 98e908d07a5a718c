//! Account model linking a local user to a Gmail mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's linked Gmail account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Local user identifier (database primary key)
    pub id: i64,
    /// Gmail address of the linked mailbox
    pub email: String,
    /// When the account was linked
    pub added_at: DateTime<Utc>,
    /// OAuth token data (JSON-serialized)
    pub token_data: Option<String>,
}

impl Account {
    /// Create an account for a known user id
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            added_at: Utc::now(),
            token_data: None,
        }
    }

    /// Set the OAuth token data (JSON-serialized)
    pub fn with_token_data(mut self, token_data: impl Into<String>) -> Self {
        self.token_data = Some(token_data.into());
        self
    }

    /// Whether a mailbox is usable for sync (a token has been stored)
    pub fn is_linked(&self) -> bool {
        self.token_data.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}
