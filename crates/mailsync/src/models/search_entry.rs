//! Search index entry: the denormalized projection of a record
//!
//! Keeps full-text and semantic query paths cheap without loading bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailAddress, MessageId, ThreadId, UserId};

/// Denormalized subset of a CanonicalRecord, keyed (user_id, message_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub checkpoint: Option<String>,
    pub subject: String,
    pub from_name: String,
    pub from_address: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub labels: Vec<String>,
    pub to: Vec<EmailAddress>,
    pub unread: bool,
    /// Whether this entry has been pushed through the embedding pipeline
    pub embedded: bool,
}

impl SearchIndexEntry {
    /// Sender for display purposes
    pub fn sender(&self) -> EmailAddress {
        if self.from_name.is_empty() {
            EmailAddress::new(self.from_address.clone())
        } else {
            EmailAddress::with_name(self.from_name.clone(), self.from_address.clone())
        }
    }
}
