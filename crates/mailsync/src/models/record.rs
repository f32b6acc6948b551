//! Canonical record model: the fully normalized, stored form of one message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, ThreadId, UserId};

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Address part (e.g., "john@example.com")
    pub address: String,
}

impl EmailAddress {
    /// Create a new email address with just the address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Parse an address from a string like "John Doe <john@example.com>".
    ///
    /// Never fails: input that doesn't match the angle-bracket form is kept
    /// verbatim as the address with an empty display name, so malformed
    /// headers survive normalization.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let address = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                address: address.to_string(),
            };
        }

        Self {
            name: None,
            address: s.to_string(),
        }
    }

    /// Display name, or empty string when none is known
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Format the address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.address),
            None => self.address.clone(),
        }
    }
}

/// Attachment metadata only. Bytes are never fetched or stored by the
/// engine; transfer is an external collaborator concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: Option<String>,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size: u64,
}

/// The canonical stored representation of one remote message.
///
/// Keyed by (user_id, message_id); upsert-only, never hard-deleted by the
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    /// Provider change-log position at ingest time
    pub checkpoint: Option<String>,
    pub subject: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body_text: String,
    pub body_html: String,
    /// HTML to render: the html body, or the plain body wrapped in <pre>
    pub processed_html: String,
    pub snippet: String,
    pub labels: Vec<String>,
    pub unread: bool,
    pub has_attachments: bool,
    pub attachments: Vec<Attachment>,
    /// RFC 2822 Message-ID header
    pub message_id_header: Option<String>,
    /// RFC 2822 References header
    pub references: Option<String>,
    /// RFC 2822 In-Reply-To header
    pub in_reply_to: Option<String>,
}

impl CanonicalRecord {
    /// Create a new record builder
    pub fn builder(user_id: UserId, message_id: MessageId, thread_id: ThreadId) -> RecordBuilder {
        RecordBuilder::new(user_id, message_id, thread_id)
    }
}

/// Builder for creating CanonicalRecord instances
pub struct RecordBuilder {
    user_id: UserId,
    message_id: MessageId,
    thread_id: ThreadId,
    checkpoint: Option<String>,
    subject: String,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
    received_at: Option<DateTime<Utc>>,
    body_text: String,
    body_html: String,
    snippet: String,
    labels: Vec<String>,
    attachments: Vec<Attachment>,
    message_id_header: Option<String>,
    references: Option<String>,
    in_reply_to: Option<String>,
}

impl RecordBuilder {
    fn new(user_id: UserId, message_id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            user_id,
            message_id,
            thread_id,
            checkpoint: None,
            subject: String::new(),
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            received_at: None,
            body_text: String::new(),
            body_html: String::new(),
            snippet: String::new(),
            labels: Vec::new(),
            attachments: Vec::new(),
            message_id_header: None,
            references: None,
            in_reply_to: None,
        }
    }

    pub fn checkpoint(mut self, checkpoint: Option<String>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn bcc(mut self, bcc: Vec<EmailAddress>) -> Self {
        self.bcc = bcc;
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn body_text(mut self, body_text: impl Into<String>) -> Self {
        self.body_text = body_text.into();
        self
    }

    pub fn body_html(mut self, body_html: impl Into<String>) -> Self {
        self.body_html = body_html.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn message_id_header(mut self, value: Option<String>) -> Self {
        self.message_id_header = value;
        self
    }

    pub fn references(mut self, value: Option<String>) -> Self {
        self.references = value;
        self
    }

    pub fn in_reply_to(mut self, value: Option<String>) -> Self {
        self.in_reply_to = value;
        self
    }

    pub fn build(self) -> CanonicalRecord {
        let now = Utc::now();
        let unread = self.labels.iter().any(|l| l == "UNREAD");
        let processed_html = if self.body_html.is_empty() {
            format!("<pre>{}</pre>", self.body_text)
        } else {
            self.body_html.clone()
        };
        CanonicalRecord {
            user_id: self.user_id,
            message_id: self.message_id,
            thread_id: self.thread_id,
            checkpoint: self.checkpoint,
            subject: self.subject,
            from: self.from.unwrap_or_else(|| EmailAddress::new("")),
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            received_at: self.received_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
            body_text: self.body_text,
            body_html: self.body_html,
            processed_html,
            snippet: self.snippet,
            labels: self.labels,
            unread,
            has_attachments: !self.attachments.is_empty(),
            attachments: self.attachments,
            message_id_header: self.message_id_header,
            references: self.references,
            in_reply_to: self.in_reply_to,
        }
    }
}
