//! Gmail API integration
//!
//! This module provides:
//! - The [`MailTransport`] seam the sync pipeline talks to
//! - Per-user OAuth2 access-token refresh
//! - Gmail API client for listing and fetching messages
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;

pub use auth::{GmailAuth, StoredToken};
pub use client::GmailClient;
pub use normalize::{MimeNode, normalize_message};

use crate::models::MessageId;

/// Error returned by a [`MailTransport`] call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// Credentials were rejected or could not be refreshed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    /// The response arrived but could not be parsed
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Authentication failures end the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Failures that say something about the provider or the link rather
    /// than about one message
    pub fn is_systemic(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One page of the remote message listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Remote mailbox as seen by the sync pipeline
///
/// Implementations must be callable from several worker threads at once.
pub trait MailTransport: Send + Sync {
    /// List one page of message ids
    ///
    /// # Arguments
    /// * `page_size` - Maximum ids to return (Gmail caps this at 500)
    /// * `page_token` - Continuation cursor from the previous page
    fn list_message_ids(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TransportError>;

    /// Fetch the full content of one message
    fn get_message(&self, id: &MessageId) -> Result<api::GmailMessage, TransportError>;
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Full message from Gmail API (`format=full`)
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub history_id: Option<String>,
        #[serde(default)]
        pub internal_date: String,
        pub payload: Option<MessagePart>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (may be base64 encoded)
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct MessageBody {
        pub size: Option<u32>,
        pub data: Option<String>,
    }

    /// A node of the MIME tree; the top-level payload has the same shape
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }
}
