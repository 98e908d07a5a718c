//! Gmail OAuth2 access-token management for one linked account
//!
//! Tokens are obtained elsewhere and stored with the account as JSON; this
//! module keeps the access token fresh and hands every refreshed token to
//! an optional listener so the caller can write it back.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::TransportError;
use crate::config::GmailCredentials;

/// Stored token data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which the access token expires
    pub expires_at: Option<i64>,
}

impl StoredToken {
    /// Refresh this many seconds before the provider's expiry
    const EXPIRY_BUFFER_SECS: i64 = 300;

    /// Parse token JSON as stored on the account
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether the access token must be refreshed before use
    pub fn needs_refresh(&self, now: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + Self::EXPIRY_BUFFER_SECS,
            // No expiry recorded: trust the token until the API rejects it
            None => false,
        }
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Called with the new token after every successful refresh
pub type TokenListener = Box<dyn Fn(&StoredToken) + Send + Sync>;

/// OAuth2 token holder for a single Gmail account
pub struct GmailAuth {
    credentials: GmailCredentials,
    token: Mutex<StoredToken>,
    token_url: String,
    on_refresh: Option<TokenListener>,
}

impl GmailAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Create a token holder from client credentials and a stored token
    pub fn new(credentials: GmailCredentials, token: StoredToken) -> Self {
        Self {
            credentials,
            token: Mutex::new(token),
            token_url: Self::TOKEN_URL.to_string(),
            on_refresh: None,
        }
    }

    /// Report refreshed tokens, including a rotated refresh token
    pub fn on_refresh(mut self, listener: impl Fn(&StoredToken) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Box::new(listener));
        self
    }

    #[cfg(test)]
    fn with_token_url(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }

    /// The token as it currently stands, refreshed or not
    pub fn current_token(&self) -> Option<StoredToken> {
        self.token.lock().ok().map(|t| t.clone())
    }

    /// Get a valid access token, refreshing it if it is about to expire
    pub fn get_access_token(&self) -> Result<String, TransportError> {
        let mut token = self
            .token
            .lock()
            .map_err(|_| TransportError::Unauthorized("token lock poisoned".to_string()))?;

        if !token.needs_refresh(chrono::Utc::now().timestamp()) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            TransportError::Unauthorized("access token expired and no refresh token".to_string())
        })?;

        let refreshed = self.refresh_access_token(&refresh_token)?;
        log::debug!("[AUTH] Refreshed Gmail access token");

        token.access_token = refreshed.access_token;
        token.refresh_token = refreshed.refresh_token.or(Some(refresh_token));
        token.expires_at = refreshed
            .expires_in
            .map(|d| chrono::Utc::now().timestamp() + d as i64);

        if let Some(listener) = &self.on_refresh {
            listener(&*token);
        }

        Ok(token.access_token.clone())
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, TransportError> {
        let response = ureq::post(self.token_url.as_str())
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| {
                TransportError::Unauthorized(format!("Failed to refresh access token: {}", e))
            })?;

        response.into_body().read_json().map_err(|e| {
            TransportError::Unauthorized(format!("Failed to parse refresh token response: {}", e))
        })
    }
}
