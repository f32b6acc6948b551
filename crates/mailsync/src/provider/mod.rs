//! Remote mail provider integration
//!
//! This module provides:
//! - The `MailProvider` trait the sync engine runs against
//! - Explicit tagged structs for provider payloads (no ad hoc map lookups)
//! - A typed error taxonomy so callers can tell auth failures, transient
//!   failures, and per-message failures apart without string matching

mod http;
mod memory;

pub use http::{DEFAULT_BASE_URL, HttpMailProvider, HttpSessionFactory};
pub use memory::{InMemoryProvider, InMemorySessionFactory};

use crate::models::{MessageId, UserId};

/// Error taxonomy for provider calls.
///
/// The variant determines how far the failure propagates: auth aborts the
/// user's pass, transient failures soft-stop the current page loop, an
/// expired checkpoint makes the caller fall back to recent-first sync, and
/// per-message failures are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credential invalid or expired; abort this user's pass
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The change-log checkpoint is too old or unknown to the provider
    #[error("checkpoint expired or invalid")]
    CheckpointExpired,

    /// Rate limiting, network failure; retried on the next scheduled pass
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// A single message could not be found
    #[error("message not found: {0}")]
    NotFound(String),

    /// The provider returned a payload we could not decode
    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_checkpoint_expired(&self) -> bool {
        matches!(self, Self::CheckpointExpired)
    }
}

/// A per-user session against the remote mail provider.
///
/// All calls are blocking; the engine serializes them within a user's pass.
pub trait MailProvider: Send + Sync {
    /// List message ids newest-first, one page at a time
    fn list_message_ids(
        &self,
        label_filter: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<api::ListPage, ProviderError>;

    /// Fetch one full message
    fn get_message(&self, id: &MessageId) -> Result<api::RawMessage, ProviderError>;

    /// Page through the change log starting at `checkpoint`.
    ///
    /// Returns `ProviderError::CheckpointExpired` when the provider no
    /// longer accepts the checkpoint.
    fn list_changes(
        &self,
        checkpoint: &str,
        label_filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<api::ChangePage, ProviderError>;

    /// List all labels known to the provider for this user
    fn list_labels(&self) -> Result<Vec<api::ProviderLabel>, ProviderError>;
}

/// Opens provider sessions for users.
///
/// Token lookup and refresh live behind this seam; a failure here is the
/// auth error that aborts only the affected user's pass.
pub trait SessionFactory: Send + Sync {
    fn session(&self, user: &UserId) -> Result<Box<dyn MailProvider>, ProviderError>;
}

/// Source of per-user bearer tokens.
///
/// Token issuance and refresh are an external collaborator concern; the
/// engine only consumes whatever this trait hands out.
pub trait TokenSource: Send + Sync {
    fn access_token(&self, user: &UserId) -> Result<String, ProviderError>;
}

/// Fixed token map, for configurations where tokens are provisioned
/// out-of-band (and for tests).
pub struct StaticTokenSource {
    tokens: std::collections::HashMap<String, String>,
}

impl StaticTokenSource {
    pub fn new(tokens: std::collections::HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl TokenSource for StaticTokenSource {
    fn access_token(&self, user: &UserId) -> Result<String, ProviderError> {
        self.tokens
            .get(user.as_str())
            .cloned()
            .ok_or_else(|| ProviderError::Auth(format!("no token for user {}", user)))
    }
}

/// Provider wire types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// One page of a message-id listing
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListPage {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    impl ListPage {
        /// The message refs on this page, empty when the field was absent
        pub fn refs(&self) -> &[MessageRef] {
            self.messages.as_deref().unwrap_or_default()
        }
    }

    /// Reference to a message (just id and thread id)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
    }

    /// Full message as returned by the provider
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RawMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: Option<String>,
        /// Milliseconds since epoch, as a decimal string
        #[serde(default)]
        pub internal_date: Option<String>,
        /// Change-log position at fetch time
        #[serde(default)]
        pub history_id: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers and body
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub mime_type: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Body of a message or part (data is base64url when present)
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Part of a multipart message tree
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

    /// One page of the change log
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChangePage {
        #[serde(rename = "history")]
        pub records: Option<Vec<ChangeRecord>>,
        pub next_page_token: Option<String>,
        /// The provider's current change-log position
        #[serde(rename = "historyId")]
        pub checkpoint: Option<String>,
    }

    /// One change-log record. Every event kind carries message refs; the
    /// engine collects distinct ids across all of them.
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChangeRecord {
        /// Change-log position of this record
        pub id: Option<String>,
        pub messages: Option<Vec<MessageRef>>,
        pub messages_added: Option<Vec<MessageChange>>,
        pub labels_added: Option<Vec<MessageChange>>,
        pub labels_removed: Option<Vec<MessageChange>>,
    }

    impl ChangeRecord {
        /// Iterate all message ids referenced by this record, in event order
        pub fn message_ids(&self) -> impl Iterator<Item = &str> {
            let plain = self
                .messages
                .iter()
                .flatten()
                .map(|m| m.id.as_str());
            let changed = self
                .messages_added
                .iter()
                .flatten()
                .chain(self.labels_added.iter().flatten())
                .chain(self.labels_removed.iter().flatten())
                .filter_map(|c| c.message.as_ref().map(|m| m.id.as_str()));
            plain.chain(changed)
        }
    }

    /// A message change event (added, label added/removed)
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageChange {
        pub message: Option<MessageRef>,
        pub label_ids: Option<Vec<String>>,
    }

    /// A label as the provider defines it
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProviderLabel {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub label_type: Option<String>,
    }

    /// Response from listing labels
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<ProviderLabel>>,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_change_record_collects_ids_across_event_kinds() {
            let json = r#"{
                "id": "1005",
                "messages": [{"id": "m1", "threadId": "t1"}],
                "messagesAdded": [{"message": {"id": "m2", "threadId": "t1"}}],
                "labelsAdded": [{"message": {"id": "m1"}, "labelIds": ["STARRED"]}],
                "labelsRemoved": [{"message": {"id": "m3"}, "labelIds": ["UNREAD"]}]
            }"#;
            let record: ChangeRecord = serde_json::from_str(json).unwrap();
            let ids: Vec<&str> = record.message_ids().collect();
            assert_eq!(ids, vec!["m1", "m2", "m1", "m3"]);
        }

        #[test]
        fn test_list_page_tolerates_missing_fields() {
            let page: ListPage = serde_json::from_str("{}").unwrap();
            assert!(page.refs().is_empty());
            assert!(page.next_page_token.is_none());
        }

        #[test]
        fn test_raw_message_minimal() {
            let json = r#"{"id": "m1", "threadId": "t1"}"#;
            let msg: RawMessage = serde_json::from_str(json).unwrap();
            assert_eq!(msg.id, "m1");
            assert!(msg.payload.is_none());
            assert!(msg.internal_date.is_none());
        }
    }
}
