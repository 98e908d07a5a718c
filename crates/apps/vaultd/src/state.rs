//! Shared handler state

use anyhow::{Context, Result};
use log::{debug, warn};
use mail::{
    Account, GmailAuth, GmailClient, GmailCredentials, MailStore, MailTransport, StoredToken,
    SyncCoordinator,
};
use std::sync::Arc;

/// Builds the transport for a user's linked mailbox
pub trait TransportFactory: Send + Sync {
    fn for_account(&self, account: &Account) -> Result<Arc<dyn MailTransport>>;
}

/// Gmail API transport using the account's stored OAuth token
///
/// Refreshed tokens are written back to the account row as soon as Google
/// issues them, so a rotated refresh token survives the run.
pub struct GmailTransportFactory {
    credentials: GmailCredentials,
    store: Arc<dyn MailStore>,
}

impl GmailTransportFactory {
    pub fn new(credentials: GmailCredentials, store: Arc<dyn MailStore>) -> Self {
        Self { credentials, store }
    }
}

impl TransportFactory for GmailTransportFactory {
    fn for_account(&self, account: &Account) -> Result<Arc<dyn MailTransport>> {
        let token_json = account
            .token_data
            .as_deref()
            .with_context(|| format!("Account {} has no stored token", account.email))?;
        let token = StoredToken::from_json(token_json)
            .with_context(|| format!("Stored token for {} is unreadable", account.email))?;

        let auth = GmailAuth::new(self.credentials.clone(), token)
            .on_refresh(save_refreshed_token(self.store.clone(), account.clone()));
        Ok(Arc::new(GmailClient::new(auth)))
    }
}

/// Token listener that stores each refreshed token on `account`
///
/// A failed write is logged; the refreshed token stays usable for the run.
fn save_refreshed_token(
    store: Arc<dyn MailStore>,
    account: Account,
) -> impl Fn(&StoredToken) + Send + Sync + 'static {
    move |token| {
        let saved = token
            .to_json()
            .context("Failed to serialize refreshed token")
            .and_then(|json| {
                let mut updated = account.clone();
                updated.token_data = Some(json);
                store.save_account(&updated)
            });

        match saved {
            Ok(()) => debug!("[AUTH] Stored refreshed token for user {}", account.id),
            Err(e) => warn!(
                "[AUTH] Could not store refreshed token for user {}: {:#}",
                account.id, e
            ),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MailStore>,
    pub coordinator: Arc<SyncCoordinator>,
    pub transports: Arc<dyn TransportFactory>,
}
