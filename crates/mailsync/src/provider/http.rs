//! HTTP mail provider client
//!
//! Speaks a Gmail-style REST surface. Uses synchronous HTTP (ureq) to be
//! executor-agnostic; the engine serializes calls per user anyway.

use std::time::Duration;

use super::api::{ChangePage, ListLabelsResponse, ListPage, ProviderLabel, RawMessage};
use super::{MailProvider, ProviderError, SessionFactory, TokenSource};
use crate::models::{MessageId, UserId};

/// Gmail API base URL, the default provider endpoint
pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// HTTP client for one user's provider session
pub struct HttpMailProvider {
    base_url: String,
    access_token: String,
}

impl HttpMailProvider {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, ProviderError> {
        let response = ureq::get(url)
            .header("Authorization", &format!("Bearer {}", self.access_token))
            .call();

        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json()
                .map_err(|e| ProviderError::Decode(format!("{what}: {e}"))),
            Err(e) => Err(map_http_error(e, what)),
        }
    }

    /// Fetch a message with exponential backoff on transient failures
    fn get_message_with_retry(
        &self,
        id: &MessageId,
        max_retries: u32,
    ) -> Result<RawMessage, ProviderError> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            id.as_str()
        );

        let mut delay = Duration::from_millis(100);
        let mut attempt = 0;
        loop {
            match self.get_json(&url, "get message") {
                Ok(msg) => return Ok(msg),
                Err(e) if e.is_transient() && attempt + 1 < max_retries => {
                    attempt += 1;
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl MailProvider for HttpMailProvider {
    fn list_message_ids(
        &self,
        label_filter: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<ListPage, ProviderError> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            self.base_url,
            page_size.min(500)
        );
        if let Some(label) = label_filter {
            url.push_str(&format!("&labelIds={}", urlencoding::encode(label)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        self.get_json(&url, "list messages")
    }

    fn get_message(&self, id: &MessageId) -> Result<RawMessage, ProviderError> {
        self.get_message_with_retry(id, 3)
    }

    fn list_changes(
        &self,
        checkpoint: &str,
        label_filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ChangePage, ProviderError> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}\
             &historyTypes=messageAdded&historyTypes=labelAdded&historyTypes=labelRemoved",
            self.base_url,
            urlencoding::encode(checkpoint)
        );
        if let Some(label) = label_filter {
            url.push_str(&format!("&labelId={}", urlencoding::encode(label)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        // The provider signals an expired/unknown checkpoint with 404
        match self.get_json(&url, "list changes") {
            Err(ProviderError::NotFound(_)) => Err(ProviderError::CheckpointExpired),
            other => other,
        }
    }

    fn list_labels(&self) -> Result<Vec<ProviderLabel>, ProviderError> {
        let url = format!("{}/users/me/labels", self.base_url);
        let response: ListLabelsResponse = self.get_json(&url, "list labels")?;
        Ok(response.labels.unwrap_or_default())
    }
}

/// Opens HTTP provider sessions, one per user, minting the bearer token
/// from the configured token source.
pub struct HttpSessionFactory {
    base_url: String,
    tokens: Box<dyn TokenSource>,
}

impl HttpSessionFactory {
    pub fn new(base_url: impl Into<String>, tokens: Box<dyn TokenSource>) -> Self {
        Self {
            base_url: base_url.into(),
            tokens,
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    fn session(&self, user: &UserId) -> Result<Box<dyn MailProvider>, ProviderError> {
        let token = self.tokens.access_token(user)?;
        Ok(Box::new(HttpMailProvider::new(self.base_url.clone(), token)))
    }
}

fn map_http_error(e: ureq::Error, what: &str) -> ProviderError {
    match e {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            ProviderError::Auth(format!("{what}: credential rejected"))
        }
        ureq::Error::StatusCode(404) => ProviderError::NotFound(what.to_string()),
        ureq::Error::StatusCode(429) => {
            ProviderError::Transient(format!("{what}: rate limited"))
        }
        ureq::Error::StatusCode(code) if code >= 500 => {
            ProviderError::Transient(format!("{what}: server error {code}"))
        }
        ureq::Error::StatusCode(code) => {
            ProviderError::Decode(format!("{what}: unexpected status {code}"))
        }
        other => ProviderError::Transient(format!("{what}: {other}")),
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
