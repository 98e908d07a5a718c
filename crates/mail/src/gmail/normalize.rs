//! Gmail API response normalization
//!
//! Converts Gmail API responses to decoded [`FetchedMessage`]s.

use anyhow::{Context, Result, ensure};
use base64::prelude::*;

use super::api::{GmailMessage, MessagePart};
use crate::models::{FetchedMessage, MessageId, ThreadId};

/// A message body as a MIME tree
///
/// Leaves carry (still base64-encoded) content; multipart nodes carry children.
#[derive(Debug, Clone, PartialEq)]
pub enum MimeNode {
    Leaf {
        mime_type: String,
        data: Option<String>,
    },
    Multipart {
        mime_type: String,
        children: Vec<MimeNode>,
    },
}

impl MimeNode {
    /// Build the tree from a Gmail payload part
    pub fn from_part(part: &MessagePart) -> Self {
        let mime_type = part
            .mime_type
            .clone()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match &part.parts {
            Some(children) if !children.is_empty() => MimeNode::Multipart {
                mime_type,
                children: children.iter().map(MimeNode::from_part).collect(),
            },
            _ => MimeNode::Leaf {
                mime_type,
                data: part.body.as_ref().and_then(|b| b.data.clone()),
            },
        }
    }

    /// Depth-first search for the first decodable leaf of the given type
    pub fn find_text(&self, mime_prefix: &str) -> Option<String> {
        match self {
            MimeNode::Leaf { mime_type, data } if mime_type.starts_with(mime_prefix) => {
                data.as_deref().and_then(decode_base64_body)
            }
            MimeNode::Leaf { .. } => None,
            MimeNode::Multipart { children, .. } => {
                children.iter().find_map(|child| child.find_text(mime_prefix))
            }
        }
    }

    /// Pick the body to store: HTML, then plain text, then the snippet
    pub fn preferred_body(&self, snippet: &str) -> String {
        self.find_text("text/html")
            .or_else(|| self.find_text("text/plain"))
            .unwrap_or_else(|| snippet.to_string())
    }
}

/// Normalize a Gmail API message to a [`FetchedMessage`]
///
/// Fails when the message is missing the fields every stored record needs.
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<FetchedMessage> {
    ensure!(!gmail_msg.id.is_empty(), "Message has no id");
    ensure!(
        !gmail_msg.thread_id.is_empty(),
        "Message {} has no thread id",
        gmail_msg.id
    );

    let payload = gmail_msg
        .payload
        .as_ref()
        .with_context(|| format!("Message {} has no payload", gmail_msg.id))?;

    let subject = extract_header(payload, "Subject").unwrap_or_default();
    let from = extract_header(payload, "From").unwrap_or_default();
    let to = extract_header(payload, "To").unwrap_or_default();

    let snippet = decode_html_entities(&gmail_msg.snippet);
    let body = MimeNode::from_part(payload).preferred_body(&snippet);

    // Milliseconds since epoch, sent as a string
    let internal_date: i64 = gmail_msg.internal_date.parse().unwrap_or(0);

    Ok(
        FetchedMessage::builder(MessageId::new(gmail_msg.id), ThreadId::new(gmail_msg.thread_id))
            .from(from)
            .to(to)
            .subject(subject)
            .body(body)
            .snippet(snippet)
            .label_ids(gmail_msg.label_ids.unwrap_or_default())
            .internal_date(internal_date)
            .history_id(gmail_msg.history_id)
            .build(),
    )
}

/// Extract a header value by name
fn extract_header(payload: &MessagePart, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data)
            && let Ok(s) = String::from_utf8(decoded)
        {
            return Some(s);
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
