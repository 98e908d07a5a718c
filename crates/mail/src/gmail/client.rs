//! Gmail API HTTP client
//!
//! Provides the [`MailTransport`] implementation backed by the Gmail API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use url::Url;

use super::api::{GmailMessage, ListMessagesResponse};
use super::{GmailAuth, MailTransport, MessagePage, TransportError};
use crate::models::MessageId;

/// Gmail API client for one user's mailbox
pub struct GmailClient {
    auth: GmailAuth,
    base_url: Url,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/";

    /// Largest page the listing endpoint accepts
    const MAX_PAGE_SIZE: usize = 500;

    /// Create a new Gmail client
    pub fn new(auth: GmailAuth) -> Self {
        Self {
            auth,
            base_url: Url::parse(Self::BASE_URL).expect("static Gmail base URL is valid"),
        }
    }

    /// Point the client at a different API root (e.g. a local mock server)
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(base_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.base_url = url;
        Ok(self)
    }

    fn list_url(&self, page_size: usize, page_token: Option<&str>) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join("users/me/messages")
            .map_err(|e| TransportError::Network(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                "maxResults",
                &page_size.clamp(1, Self::MAX_PAGE_SIZE).to_string(),
            );
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    fn message_url(&self, id: &MessageId) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(&format!("users/me/messages/{}", urlencoding::encode(id.as_str())))
            .map_err(|e| TransportError::Network(e.to_string()))?;
        url.query_pairs_mut().append_pair("format", "full");
        Ok(url)
    }

    /// Authorized GET returning the parsed JSON body
    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T, TransportError> {
        let access_token = self.auth.get_access_token()?;

        let mut response = ureq::get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(map_ureq_error)?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl MailTransport for GmailClient {
    fn list_message_ids(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TransportError> {
        let url = self.list_url(page_size, page_token)?;
        let list: ListMessagesResponse = self.get_json(&url)?;

        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, TransportError> {
        let url = self.message_url(id)?;
        self.get_json(&url).map_err(|e| match e {
            TransportError::Http { status: 404 } => TransportError::NotFound(id.clone()),
            other => other,
        })
    }
}

/// Map a ureq failure onto the transport error taxonomy
fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            TransportError::Unauthorized("Gmail rejected the access token".to_string())
        }
        ureq::Error::StatusCode(status) => TransportError::Http { status },
        other => TransportError::Network(other.to_string()),
    }
}
