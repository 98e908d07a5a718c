//! Remote id collection: walks the paginated message listing

use log::{debug, info, warn};
use std::collections::HashSet;

use super::CancelToken;
use crate::gmail::{MailTransport, TransportError};
use crate::models::MessageId;

/// Result of walking the listing endpoint
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IdCollection {
    /// Ids in provider order
    pub ids: Vec<MessageId>,
    /// Listing pages fetched
    pub pages: usize,
    /// Whether cancellation cut the walk short
    pub cancelled: bool,
}

/// Collect every message id in the mailbox
///
/// Cancellation is checked before each page request. A cancelled walk
/// returns the ids gathered so far rather than an error.
///
/// # Arguments
/// * `transport` - Remote mailbox
/// * `page_size` - Ids requested per page
/// * `cancel` - Checked at the top of every iteration
pub fn collect_all_ids(
    transport: &dyn MailTransport,
    page_size: usize,
    cancel: &CancelToken,
) -> Result<IdCollection, TransportError> {
    let mut collection = IdCollection::default();
    let mut page_token: Option<String> = None;
    let mut seen_tokens: HashSet<String> = HashSet::new();

    loop {
        if cancel.is_cancelled() {
            info!(
                "[SYNC] Listing cancelled after {} pages ({} ids)",
                collection.pages,
                collection.ids.len()
            );
            collection.cancelled = true;
            break;
        }

        let page = transport.list_message_ids(page_size, page_token.as_deref())?;
        collection.pages += 1;
        debug!(
            "[SYNC] Listing page {}: {} ids",
            collection.pages,
            page.ids.len()
        );
        collection.ids.extend(page.ids);

        match page.next_page_token {
            Some(next) if !next.is_empty() => {
                // A cursor we have already followed would re-list the same ids
                if !seen_tokens.insert(next.clone()) {
                    warn!("[SYNC] Listing returned a repeated page token, stopping");
                    break;
                }
                page_token = Some(next);
            }
            _ => break,
        }
    }

    Ok(collection)
}
