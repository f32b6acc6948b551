//! In-memory mail provider
//!
//! A scriptable fake mailbox used for tests and local development. Keeps
//! call counters so tests can assert how much provider work a sync run
//! actually performed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::api::{ChangePage, ChangeRecord, ListPage, MessageRef, ProviderLabel, RawMessage};
use super::{MailProvider, ProviderError, SessionFactory};
use crate::models::{MessageId, UserId};

/// In-memory implementation of MailProvider.
///
/// Messages are listed newest-first (descending internal date). Page tokens
/// are offsets into that ordering, so a token handed out with one page size
/// stays valid when resumed with another, the way real providers behave
/// for backlog cursors.
pub struct InMemoryProvider {
    messages: RwLock<Vec<RawMessage>>,
    changes: RwLock<Vec<ChangeRecord>>,
    labels: RwLock<Vec<ProviderLabel>>,
    checkpoint_expired: AtomicBool,
    fail_lists: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    change_calls: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            changes: RwLock::new(Vec::new()),
            labels: RwLock::new(Vec::new()),
            checkpoint_expired: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            change_calls: AtomicUsize::new(0),
        }
    }

    /// Add a message to the fake mailbox
    pub fn add_message(&self, message: RawMessage) {
        let mut messages = self.messages.write().unwrap();
        messages.push(message);
        // Newest first, stable for equal timestamps
        messages.sort_by_key(|m| {
            std::cmp::Reverse(
                m.internal_date
                    .as_deref()
                    .and_then(|d| d.parse::<i64>().ok())
                    .unwrap_or(0),
            )
        });
    }

    /// Append a change-log record
    pub fn add_change(&self, record: ChangeRecord) {
        self.changes.write().unwrap().push(record);
    }

    /// Replace the provider label set
    pub fn set_labels(&self, labels: Vec<ProviderLabel>) {
        *self.labels.write().unwrap() = labels;
    }

    /// Make every change-log call report an expired checkpoint
    pub fn set_checkpoint_expired(&self, expired: bool) {
        self.checkpoint_expired.store(expired, Ordering::SeqCst);
    }

    /// Make every listing call fail with a transient error
    pub fn set_listing_failure(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().unwrap().len()
    }

    /// Number of list_message_ids calls served
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of get_message calls served
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of list_changes calls served
    pub fn change_calls(&self) -> usize {
        self.change_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MailProvider for InMemoryProvider {
    fn list_message_ids(
        &self,
        label_filter: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<ListPage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("listing unavailable".to_string()));
        }

        let messages = self.messages.read().unwrap();
        let filtered: Vec<&RawMessage> = messages
            .iter()
            .filter(|m| match label_filter {
                Some(label) => m
                    .label_ids
                    .as_ref()
                    .is_some_and(|ls| ls.iter().any(|l| l == label)),
                None => true,
            })
            .collect();

        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Decode(format!("bad page token: {token}")))?,
            None => 0,
        };
        let end = (start + page_size.max(1)).min(filtered.len());

        let refs: Vec<MessageRef> = filtered[start.min(filtered.len())..end]
            .iter()
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: Some(m.thread_id.clone()),
            })
            .collect();

        Ok(ListPage {
            messages: if refs.is_empty() { None } else { Some(refs) },
            next_page_token: if end < filtered.len() {
                Some(end.to_string())
            } else {
                None
            },
            result_size_estimate: Some(filtered.len() as u32),
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<RawMessage, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .read()
            .unwrap()
            .iter()
            .find(|m| m.id == id.as_str())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.as_str().to_string()))
    }

    fn list_changes(
        &self,
        checkpoint: &str,
        _label_filter: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<ChangePage, ProviderError> {
        self.change_calls.fetch_add(1, Ordering::SeqCst);
        if self.checkpoint_expired.load(Ordering::SeqCst) {
            return Err(ProviderError::CheckpointExpired);
        }

        let since: u64 = checkpoint.parse().unwrap_or(0);
        let changes = self.changes.read().unwrap();
        let records: Vec<ChangeRecord> = changes
            .iter()
            .filter(|r| {
                r.id.as_deref()
                    .and_then(|id| id.parse::<u64>().ok())
                    .is_some_and(|id| id > since)
            })
            .cloned()
            .collect();

        let newest = records
            .iter()
            .filter_map(|r| r.id.clone())
            .max_by_key(|id| id.parse::<u64>().unwrap_or(0));

        Ok(ChangePage {
            records: if records.is_empty() {
                None
            } else {
                Some(records)
            },
            next_page_token: None,
            checkpoint: newest.or_else(|| Some(checkpoint.to_string())),
        })
    }

    fn list_labels(&self) -> Result<Vec<ProviderLabel>, ProviderError> {
        Ok(self.labels.read().unwrap().clone())
    }
}

/// Session factory over shared in-memory providers, one per user.
///
/// A user without a registered provider gets the auth error a missing
/// credential would produce.
pub struct InMemorySessionFactory {
    providers: RwLock<HashMap<String, Arc<InMemoryProvider>>>,
}

impl InMemorySessionFactory {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, user: &UserId, provider: Arc<InMemoryProvider>) {
        self.providers
            .write()
            .unwrap()
            .insert(user.as_str().to_string(), provider);
    }
}

impl Default for InMemorySessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for InMemorySessionFactory {
    fn session(&self, user: &UserId) -> Result<Box<dyn MailProvider>, ProviderError> {
        let providers = self.providers.read().unwrap();
        match providers.get(user.as_str()) {
            Some(provider) => Ok(Box::new(provider.clone())),
            None => Err(ProviderError::Auth(format!("no credential for user {user}"))),
        }
    }
}

impl MailProvider for Arc<InMemoryProvider> {
    fn list_message_ids(
        &self,
        label_filter: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<ListPage, ProviderError> {
        (**self).list_message_ids(label_filter, page_token, page_size)
    }

    fn get_message(&self, id: &MessageId) -> Result<RawMessage, ProviderError> {
        (**self).get_message(id)
    }

    fn list_changes(
        &self,
        checkpoint: &str,
        label_filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ChangePage, ProviderError> {
        (**self).list_changes(checkpoint, label_filter, page_token)
    }

    fn list_labels(&self) -> Result<Vec<ProviderLabel>, ProviderError> {
        (**self).list_labels()
    }
}

#[cfg(test)]
mod tests {
    use super::super::api::MessagePayload;
    use super::*;

    fn make_message(id: &str, internal_date: i64) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            label_ids: Some(vec!["INBOX".to_string()]),
            snippet: Some(format!("snippet {id}")),
            internal_date: Some(internal_date.to_string()),
            history_id: Some("1".to_string()),
            payload: Some(MessagePayload::default()),
        }
    }

    #[test]
    fn test_lists_newest_first() {
        let provider = InMemoryProvider::new();
        provider.add_message(make_message("old", 1_000));
        provider.add_message(make_message("new", 3_000));
        provider.add_message(make_message("mid", 2_000));

        let page = provider.list_message_ids(None, None, 10).unwrap();
        let ids: Vec<&str> = page.refs().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_page_token_is_offset() {
        let provider = InMemoryProvider::new();
        for i in 0..5 {
            provider.add_message(make_message(&format!("m{i}"), 100 - i));
        }

        let page1 = provider.list_message_ids(None, None, 2).unwrap();
        assert_eq!(page1.refs().len(), 2);
        assert_eq!(page1.next_page_token.as_deref(), Some("2"));

        // Resume with a different page size; token still lines up
        let page2 = provider.list_message_ids(None, Some("2"), 3).unwrap();
        assert_eq!(page2.refs().len(), 3);
        assert!(page2.next_page_token.is_none());
    }

    #[test]
    fn test_expired_checkpoint_is_typed() {
        let provider = InMemoryProvider::new();
        provider.set_checkpoint_expired(true);
        let err = provider.list_changes("10", None, None).unwrap_err();
        assert!(err.is_checkpoint_expired());
    }

    #[test]
    fn test_changes_filtered_by_checkpoint() {
        let provider = InMemoryProvider::new();
        provider.add_change(ChangeRecord {
            id: Some("5".to_string()),
            ..Default::default()
        });
        provider.add_change(ChangeRecord {
            id: Some("9".to_string()),
            ..Default::default()
        });

        let page = provider.list_changes("5", None, None).unwrap();
        assert_eq!(page.records.as_ref().unwrap().len(), 1);
        assert_eq!(page.checkpoint.as_deref(), Some("9"));

        let empty = provider.list_changes("9", None, None).unwrap();
        assert!(empty.records.is_none());
        assert_eq!(empty.checkpoint.as_deref(), Some("9"));
    }
}
