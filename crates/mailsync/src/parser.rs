//! Message normalization
//!
//! Converts raw provider messages into the canonical record and its search
//! index projection. Parsing is deliberately tolerant: malformed headers
//! and missing fields degrade to documented fallbacks instead of failing
//! the record.

use std::collections::HashSet;

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use crate::models::{
    Attachment, CanonicalRecord, EmailAddress, MessageId, SearchIndexEntry, ThreadId, UserId,
};
use crate::provider::api::{MessagePart, MessagePayload, RawMessage};

/// Subject used when the header is missing or empty
const NO_SUBJECT: &str = "(No Subject)";

/// A normalized message: the full record plus its index projection
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub record: CanonicalRecord,
    pub entry: SearchIndexEntry,
}

/// Normalize a raw provider message for one user.
///
/// Deterministic for a given input, except that a missing or unparseable
/// timestamp falls back to the current time.
pub fn parse_message(user: &UserId, raw: &RawMessage) -> ParsedMessage {
    let payload = raw.payload.clone().unwrap_or_default();

    let subject = extract_header(&payload, "Subject")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let from = extract_header(&payload, "From")
        .map(|s| EmailAddress::parse(&s))
        .unwrap_or_else(|| EmailAddress::new(""));

    let to = extract_header(&payload, "To")
        .map(|s| parse_address_list(&s))
        .unwrap_or_default();
    let cc = extract_header(&payload, "Cc")
        .map(|s| parse_address_list(&s))
        .unwrap_or_default();
    let bcc = extract_header(&payload, "Bcc")
        .map(|s| parse_address_list(&s))
        .unwrap_or_default();

    let received_at = parse_internal_date(raw.internal_date.as_deref());

    let body = extract_body(&payload, &raw.id);

    let snippet = raw
        .snippet
        .as_deref()
        .map(decode_html_entities)
        .unwrap_or_default();

    let labels = raw.label_ids.clone().unwrap_or_default();

    let record = CanonicalRecord::builder(
        user.clone(),
        MessageId::new(&raw.id),
        ThreadId::new(&raw.thread_id),
    )
    .checkpoint(raw.history_id.clone())
    .subject(subject)
    .from(from)
    .to(to)
    .cc(cc)
    .bcc(bcc)
    .received_at(received_at)
    .body_text(body.text)
    .body_html(body.html)
    .snippet(snippet)
    .labels(labels)
    .attachments(body.attachments)
    .message_id_header(extract_header(&payload, "Message-ID"))
    .references(extract_header(&payload, "References"))
    .in_reply_to(extract_header(&payload, "In-Reply-To"))
    .build();

    let entry = index_entry_for(&record);

    ParsedMessage { record, entry }
}

/// Build the search index projection of a record
pub fn index_entry_for(record: &CanonicalRecord) -> SearchIndexEntry {
    SearchIndexEntry {
        user_id: record.user_id.clone(),
        message_id: record.message_id.clone(),
        thread_id: record.thread_id.clone(),
        checkpoint: record.checkpoint.clone(),
        subject: record.subject.clone(),
        from_name: record.from.display_name().to_string(),
        from_address: record.from.address.clone(),
        snippet: record.snippet.clone(),
        received_at: record.received_at,
        labels: record.labels.clone(),
        to: record.to.clone(),
        unread: record.unread,
        embedded: false,
    }
}

/// Merge a freshly fetched remote label set with the stored one.
///
/// The merge is additive for locally managed labels: any label on the
/// stored record that is absent from the remote set but belongs to the
/// user's local catalog is preserved, so a routine resync never clobbers
/// local organizational state. Remote labels always win for everything
/// else.
pub fn merge_labels(
    remote: &[String],
    stored: &[String],
    locally_managed: &HashSet<String>,
) -> Vec<String> {
    let mut merged = remote.to_vec();
    for label in stored {
        if locally_managed.contains(label) && !merged.contains(label) {
            merged.push(label.clone());
        }
    }
    merged
}

/// Extract a header value by name, case-insensitively
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Parse a comma-separated list of addresses.
///
/// Each element degrades to `{name: None, address: <raw>}` on malformed
/// input, matching single-address parsing.
fn parse_address_list(s: &str) -> Vec<EmailAddress> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(EmailAddress::parse)
        .collect()
}

/// Parse a milliseconds-since-epoch string, falling back to now
fn parse_internal_date(internal_date: Option<&str>) -> DateTime<Utc> {
    internal_date
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now)
}

/// Extracted body content and attachment metadata
#[derive(Debug, Default)]
struct ExtractedBody {
    text: String,
    html: String,
    attachments: Vec<Attachment>,
}

/// Walk the part tree collecting text/plain and text/html content in
/// encounter order, and attachment metadata for parts with a filename.
///
/// The traversal is an explicit stack, not recursion, so adversarially
/// nested input cannot exhaust the call stack.
fn extract_body(payload: &MessagePayload, message_id: &str) -> ExtractedBody {
    let mut body = ExtractedBody::default();

    match &payload.parts {
        Some(parts) => {
            let mut stack: Vec<&MessagePart> = Vec::new();
            for part in parts.iter().rev() {
                stack.push(part);
            }

            while let Some(part) = stack.pop() {
                if let Some(filename) = part.filename.as_deref().filter(|f| !f.is_empty()) {
                    body.attachments.push(Attachment {
                        attachment_id: part.body.as_ref().and_then(|b| b.attachment_id.clone()),
                        filename: filename.to_string(),
                        mime_type: part.mime_type.clone(),
                        size: part.body.as_ref().and_then(|b| b.size).unwrap_or(0),
                    });
                    continue;
                }

                let mime = part.mime_type.as_deref().unwrap_or("");
                let data = part.body.as_ref().and_then(|b| b.data.as_deref());

                if mime.starts_with("text/plain")
                    && let Some(data) = data
                {
                    match decode_base64_body(data) {
                        Some(decoded) => body.text.push_str(&decoded),
                        None => log::warn!("undecodable text part in message {message_id}"),
                    }
                } else if mime.starts_with("text/html")
                    && let Some(data) = data
                {
                    match decode_base64_body(data) {
                        Some(decoded) => body.html.push_str(&decoded),
                        None => log::warn!("undecodable html part in message {message_id}"),
                    }
                } else if let Some(nested) = &part.parts {
                    // Reverse so children pop in document order
                    for child in nested.iter().rev() {
                        stack.push(child);
                    }
                }
            }
        }
        None => {
            // Simple single-part message: body data lives on the payload
            if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
                let decoded = decode_base64_body(data).unwrap_or_default();
                if payload
                    .mime_type
                    .as_deref()
                    .is_some_and(|m| m.starts_with("text/html"))
                {
                    body.html = decoded;
                } else {
                    body.text = decoded;
                }
            }
        }
    }

    body
}

/// Decode base64-encoded body data.
///
/// Providers use URL-safe base64 but padding varies, so several decoders
/// are tried in order. Invalid UTF-8 is replaced rather than rejected.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            return Some(String::from_utf8_lossy(&decoded).into_owned());
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::api::{Header, MessageBody};

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn encode(text: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(text)
    }

    fn text_part(text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some("text/plain".to_string()),
            body: Some(MessageBody {
                size: Some(text.len() as u64),
                data: Some(encode(text)),
                attachment_id: None,
            }),
            ..Default::default()
        }
    }

    fn raw_message(headers: Vec<Header>, parts: Option<Vec<MessagePart>>) -> RawMessage {
        RawMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            snippet: Some("Hello &amp; welcome".to_string()),
            internal_date: Some("1700000000000".to_string()),
            history_id: Some("42".to_string()),
            payload: Some(MessagePayload {
                mime_type: Some("multipart/mixed".to_string()),
                headers: Some(headers),
                body: None,
                parts,
            }),
        }
    }

    #[test]
    fn test_parse_basic_message() {
        let raw = raw_message(
            vec![
                header("From", "Jane Doe <jane@example.com>"),
                header("To", "a@example.com, Bob <b@example.com>"),
                header("Subject", "Quarterly report"),
            ],
            Some(vec![text_part("the body")]),
        );

        let parsed = parse_message(&UserId::new("u1"), &raw);
        let record = &parsed.record;

        assert_eq!(record.subject, "Quarterly report");
        assert_eq!(record.from.name.as_deref(), Some("Jane Doe"));
        assert_eq!(record.from.address, "jane@example.com");
        assert_eq!(record.to.len(), 2);
        assert_eq!(record.body_text, "the body");
        assert_eq!(record.snippet, "Hello & welcome");
        assert!(record.unread);
        assert_eq!(record.checkpoint.as_deref(), Some("42"));
        assert_eq!(record.received_at.timestamp_millis(), 1_700_000_000_000);

        assert_eq!(parsed.entry.subject, "Quarterly report");
        assert_eq!(parsed.entry.from_name, "Jane Doe");
        assert!(!parsed.entry.embedded);
    }

    #[test]
    fn test_malformed_from_header_kept_verbatim() {
        let raw = raw_message(vec![header("From", "not-an-address")], None);
        let parsed = parse_message(&UserId::new("u1"), &raw);

        assert_eq!(parsed.record.from.name, None);
        assert_eq!(parsed.record.from.address, "not-an-address");
        assert_eq!(parsed.entry.from_name, "");
        assert_eq!(parsed.entry.from_address, "not-an-address");
    }

    #[test]
    fn test_missing_subject_falls_back() {
        let raw = raw_message(vec![header("From", "a@b.com")], None);
        let parsed = parse_message(&UserId::new("u1"), &raw);
        assert_eq!(parsed.record.subject, "(No Subject)");
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_now() {
        let mut raw = raw_message(vec![], None);
        raw.internal_date = Some("not-a-number".to_string());

        let before = Utc::now();
        let parsed = parse_message(&UserId::new("u1"), &raw);
        assert!(parsed.record.received_at >= before);
    }

    #[test]
    fn test_nested_parts_collected_in_order() {
        let nested = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(vec![
                text_part("first "),
                MessagePart {
                    mime_type: Some("multipart/related".to_string()),
                    parts: Some(vec![text_part("second ")]),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let raw = raw_message(vec![], Some(vec![nested, text_part("third")]));

        let parsed = parse_message(&UserId::new("u1"), &raw);
        assert_eq!(parsed.record.body_text, "first second third");
    }

    #[test]
    fn test_deeply_nested_parts_do_not_overflow() {
        let mut part = text_part("leaf");
        for _ in 0..10_000 {
            part = MessagePart {
                mime_type: Some("multipart/mixed".to_string()),
                parts: Some(vec![part]),
                ..Default::default()
            };
        }
        let raw = raw_message(vec![], Some(vec![part]));

        let parsed = parse_message(&UserId::new("u1"), &raw);
        assert_eq!(parsed.record.body_text, "leaf");
    }

    #[test]
    fn test_attachment_metadata_only() {
        let attachment = MessagePart {
            mime_type: Some("application/pdf".to_string()),
            filename: Some("report.pdf".to_string()),
            body: Some(MessageBody {
                size: Some(2048),
                data: None,
                attachment_id: Some("att-1".to_string()),
            }),
            ..Default::default()
        };
        let raw = raw_message(vec![], Some(vec![text_part("body"), attachment]));

        let parsed = parse_message(&UserId::new("u1"), &raw);
        assert!(parsed.record.has_attachments);
        assert_eq!(parsed.record.attachments.len(), 1);
        let att = &parsed.record.attachments[0];
        assert_eq!(att.filename, "report.pdf");
        assert_eq!(att.attachment_id.as_deref(), Some("att-1"));
        assert_eq!(att.size, 2048);
        // Attachment part contributes no body content
        assert_eq!(parsed.record.body_text, "body");
    }

    #[test]
    fn test_single_part_html_message() {
        let raw = RawMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            label_ids: None,
            snippet: None,
            internal_date: Some("1700000000000".to_string()),
            history_id: None,
            payload: Some(MessagePayload {
                mime_type: Some("text/html".to_string()),
                headers: None,
                body: Some(MessageBody {
                    size: None,
                    data: Some(encode("<p>hi</p>")),
                    attachment_id: None,
                }),
                parts: None,
            }),
        };

        let parsed = parse_message(&UserId::new("u1"), &raw);
        assert_eq!(parsed.record.body_html, "<p>hi</p>");
        assert_eq!(parsed.record.processed_html, "<p>hi</p>");
        assert!(parsed.record.body_text.is_empty());
    }

    #[test]
    fn test_merge_preserves_locally_managed_labels() {
        let remote = vec!["INBOX".to_string()];
        let stored = vec!["INBOX".to_string(), "todo".to_string(), "STARRED".to_string()];
        let local: HashSet<String> = ["todo".to_string(), "done".to_string()].into();

        let merged = merge_labels(&remote, &stored, &local);
        assert!(merged.contains(&"INBOX".to_string()));
        assert!(merged.contains(&"todo".to_string()));
        // STARRED is provider-native; the remote set wins
        assert!(!merged.contains(&"STARRED".to_string()));
    }

    #[test]
    fn test_merge_is_stable_when_remote_has_label() {
        let remote = vec!["INBOX".to_string(), "todo".to_string()];
        let stored = vec!["todo".to_string()];
        let local: HashSet<String> = ["todo".to_string()].into();

        let merged = merge_labels(&remote, &stored, &local);
        assert_eq!(
            merged.iter().filter(|l| l.as_str() == "todo").count(),
            1
        );
    }

    #[test]
    fn test_decode_base64_body_padding_variants() {
        // "Hello, World!" in base64url without padding
        assert_eq!(
            decode_base64_body("SGVsbG8sIFdvcmxkIQ"),
            Some("Hello, World!".to_string())
        );
        // Standard alphabet with padding
        assert_eq!(
            decode_base64_body("SGVsbG8sIFdvcmxkIQ=="),
            Some("Hello, World!".to_string())
        );
    }
}
