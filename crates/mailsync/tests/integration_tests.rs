//! Integration tests for the mailsync crate
//!
//! These tests verify the complete flow: recent-first sync, incremental
//! change-log replay, backlog draining, label preservation, and the
//! semantic index rebuild, all against the in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mailsync::provider::api::{ChangeRecord, MessageChange, MessagePayload, MessageRef, RawMessage};
use mailsync::{
    BacklogMode, CanonicalRecord, Embedder, EmbeddingPipeline, HashEmbedder, InMemoryProvider,
    InMemorySessionFactory, InMemoryStore, InMemoryVectorStore, Label, MessageId, Orchestrator,
    RecordStore, SyncConfig, SyncStateStore, ThreadId, UserId, VectorStore, process_backlog,
    semantic_search, smart_recent_first, sync_from_history,
};

/// Helper to build a raw provider message
fn raw_message(id: &str, history_id: u64, internal_date: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: format!("t-{id}"),
        label_ids: Some(vec!["INBOX".to_string()]),
        snippet: Some(format!("snippet for {id}")),
        internal_date: Some(internal_date.to_string()),
        history_id: Some(history_id.to_string()),
        payload: Some(MessagePayload::default()),
    }
}

/// Seed a mailbox with `count` messages, newest first (m0 newest)
fn seed_mailbox(provider: &InMemoryProvider, count: usize) {
    for i in 0..count {
        provider.add_message(raw_message(
            &format!("m{i}"),
            (1000 + count - i) as u64,
            9_000_000 - i as i64,
        ));
    }
}

fn pipeline() -> EmbeddingPipeline {
    EmbeddingPipeline::new(Arc::new(HashEmbedder::default()), 32)
}

fn orchestrator_for(
    provider: Arc<InMemoryProvider>,
    store: Arc<InMemoryStore>,
    vectors: Arc<InMemoryVectorStore>,
    user: &UserId,
) -> Orchestrator {
    let sessions = InMemorySessionFactory::new();
    sessions.insert(user, provider);
    let orchestrator = Orchestrator::new(
        Arc::new(sessions),
        store.clone(),
        store,
        vectors,
        pipeline(),
        SyncConfig::default(),
    );
    orchestrator.register_user(user.clone());
    orchestrator
}

#[test]
fn test_dedup_idempotence() {
    let provider = InMemoryProvider::new();
    seed_mailbox(&provider, 80);
    let store = InMemoryStore::new();
    let user = UserId::new("u1");

    let first = smart_recent_first(&provider, &store, &user, None, 100).unwrap();
    assert_eq!(first.stats.stored, 80);
    let fetches = provider.get_calls();
    let upserts = store.record_upserts();
    let checks = store.existence_checks();

    // Second run with no new remote mail: existence checks still happen,
    // but zero additional fetch/parse/store operations
    let second = smart_recent_first(&provider, &store, &user, None, 100).unwrap();
    assert_eq!(second.stats.stored, 0);
    assert_eq!(second.stats.skipped, 80);
    assert_eq!(provider.get_calls(), fetches);
    assert_eq!(store.record_upserts(), upserts);
    assert!(store.existence_checks() > checks);
}

#[test]
fn test_convergence_to_remote_count() {
    let provider = Arc::new(InMemoryProvider::new());
    seed_mailbox(&provider, 250);
    let store = Arc::new(InMemoryStore::new());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let user = UserId::new("u1");
    let orchestrator = orchestrator_for(provider.clone(), store.clone(), vectors, &user);

    // No new remote mail arrives; enough sync passes and backlog ticks
    // must converge on the remote total
    for _ in 0..5 {
        orchestrator.sync_user(&user);
        orchestrator.process_backlog_tick();
    }
    for _ in 0..10 {
        orchestrator.process_backlog_tick();
    }

    assert_eq!(store.count_records(&user).unwrap(), provider.message_count());

    let state = SyncStateStore::get(store.as_ref(), &user).unwrap().unwrap();
    assert!(state.backlog_cursor.is_none());
    assert!(state.full_sync_completed);
}

#[test]
fn test_checkpoint_monotonicity() {
    let provider = InMemoryProvider::new();
    provider.add_message(raw_message("m1", 105, 1_000));
    provider.add_change(ChangeRecord {
        id: Some("105".to_string()),
        messages_added: Some(vec![MessageChange {
            message: Some(MessageRef {
                id: "m1".to_string(),
                thread_id: None,
            }),
            label_ids: None,
        }]),
        ..Default::default()
    });
    let store = InMemoryStore::new();
    let user = UserId::new("u1");

    // With events: returned checkpoint advances past the input
    let out = sync_from_history(&provider, &store, &user, "100", None, 5).unwrap();
    assert_eq!(out.checkpoint, "105");

    // Without events: returned checkpoint equals the input
    let out = sync_from_history(&provider, &store, &user, "105", None, 5).unwrap();
    assert_eq!(out.checkpoint, "105");

    // Never goes backwards, even from a checkpoint past every event
    let out = sync_from_history(&provider, &store, &user, "999", None, 5).unwrap();
    assert_eq!(out.checkpoint, "999");
}

#[test]
fn test_cursor_mode_exclusivity_through_transitions() {
    let provider = Arc::new(InMemoryProvider::new());
    seed_mailbox(&provider, 160);
    let store = Arc::new(InMemoryStore::new());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let user = UserId::new("u1");
    let orchestrator = orchestrator_for(provider, store.clone(), vectors, &user);

    // UNSYNCED -> PARTIAL: cursor set, mode paged
    orchestrator.sync_user(&user);
    let state = SyncStateStore::get(store.as_ref(), &user).unwrap().unwrap();
    assert!(state.has_backlog());
    assert_eq!(state.backlog_mode, BacklogMode::Paged);
    assert!(state.is_consistent());

    // Every backlog run keeps the invariant, through to SYNCED
    loop {
        orchestrator.process_backlog_tick();
        let state = SyncStateStore::get(store.as_ref(), &user).unwrap().unwrap();
        assert!(state.is_consistent());
        if !state.has_backlog() {
            assert_eq!(state.backlog_mode, BacklogMode::None);
            assert!(state.full_sync_completed);
            break;
        }
    }
}

#[test]
fn test_label_preservation_across_resync() {
    let provider = InMemoryProvider::new();
    provider.add_message(raw_message("m1", 101, 1_000));
    let store = InMemoryStore::new();
    let user = UserId::new("u1");

    // The user's catalog has a locally managed board label
    store.upsert_label(&user, Label::local("todo", "To Do")).unwrap();
    store
        .upsert_label(&user, Label::provider("INBOX", "Inbox"))
        .unwrap();

    // Initial sync, then the user files the message under "todo"
    smart_recent_first(&provider, &store, &user, None, 10).unwrap();
    let mut record = store
        .get_record(&user, &MessageId::new("m1"))
        .unwrap()
        .unwrap();
    record.labels.push("todo".to_string());
    store.upsert_record(record).unwrap();

    // A change event re-fetches the message; the remote label set does
    // not contain "todo"
    provider.add_change(ChangeRecord {
        id: Some("102".to_string()),
        labels_added: Some(vec![MessageChange {
            message: Some(MessageRef {
                id: "m1".to_string(),
                thread_id: None,
            }),
            label_ids: Some(vec!["STARRED".to_string()]),
        }]),
        ..Default::default()
    });
    sync_from_history(&provider, &store, &user, "101", None, 5).unwrap();

    let record = store
        .get_record(&user, &MessageId::new("m1"))
        .unwrap()
        .unwrap();
    assert!(record.labels.contains(&"todo".to_string()));
    assert!(record.labels.contains(&"INBOX".to_string()));
}

#[test]
fn test_scenario_bounded_backfill_with_backlog() {
    // 250 remote messages, target 100 per run, provider page size 100
    let provider = InMemoryProvider::new();
    seed_mailbox(&provider, 250);
    let store = InMemoryStore::new();
    let user = UserId::new("u1");

    let outcome = smart_recent_first(&provider, &store, &user, None, 100).unwrap();
    assert_eq!(outcome.stats.stored, 100);
    assert!(outcome.backlog_cursor.is_some());
    store
        .upsert(
            &user,
            mailsync::SyncStateUpdate {
                backlog_cursor: Some(outcome.backlog_cursor.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    // One backlog run: 2 pages of 20
    let backlog = process_backlog(&provider, &store, &store, &user, 20, 2, 500).unwrap();
    assert_eq!(backlog.stats.stored, 40);
    assert!(backlog.backlog_remaining);

    let total = store.count_records(&user).unwrap();
    assert_eq!(total, 140);
    // The cursor points at the remaining messages
    assert_eq!(provider.message_count() - total, 110);
    let state = SyncStateStore::get(&store, &user).unwrap().unwrap();
    assert_eq!(state.backlog_cursor.as_deref(), Some("140"));
}

#[test]
fn test_scenario_malformed_sender_header() {
    let provider = InMemoryProvider::new();
    let mut raw = raw_message("m1", 101, 1_000);
    raw.payload = Some(MessagePayload {
        headers: Some(vec![mailsync::provider::api::Header {
            name: "From".to_string(),
            value: "not-an-address".to_string(),
        }]),
        ..Default::default()
    });
    provider.add_message(raw);
    let store = InMemoryStore::new();
    let user = UserId::new("u1");

    let outcome = smart_recent_first(&provider, &store, &user, None, 10).unwrap();
    assert_eq!(outcome.stats.stored, 1);
    assert_eq!(outcome.stats.errors, 0);

    let record = store
        .get_record(&user, &MessageId::new("m1"))
        .unwrap()
        .unwrap();
    assert_eq!(record.from.name, None);
    assert_eq!(record.from.address, "not-an-address");
}

/// Embedder wrapper that counts batch calls
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::default(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for CountingEmbedder {
    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(texts)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

#[test]
fn test_scenario_lazy_rebuild_happens_once() {
    let store = InMemoryStore::new();
    let vectors = InMemoryVectorStore::new();
    let user = UserId::new("u1");

    // Populated canonical store, empty vector index (fresh process)
    for i in 0..10 {
        let record = CanonicalRecord::builder(
            user.clone(),
            MessageId::new(format!("m{i}")),
            ThreadId::new("t1"),
        )
        .subject(format!("project update {i}"))
        .snippet("status report")
        .build();
        store.upsert_record(record.clone()).unwrap();
        store
            .upsert_index_entry(mailsync::parser::index_entry_for(&record))
            .unwrap();
    }

    let embedder = Arc::new(CountingEmbedder::new());
    let pipeline = EmbeddingPipeline::new(embedder.clone(), 32);

    let hits = semantic_search(
        &user,
        "project update",
        5,
        None,
        &pipeline,
        &store,
        &vectors,
    )
    .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(vectors.count(&user).unwrap(), 10);
    // One call for the query embedding, one for the rebuild batch
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

    // A second query finds vectors and does not rebuild again
    let hits = semantic_search(
        &user,
        "project update",
        5,
        None,
        &pipeline,
        &store,
        &vectors,
    )
    .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_sync_pass_feeds_embedding_pipeline() {
    let provider = Arc::new(InMemoryProvider::new());
    seed_mailbox(&provider, 20);
    let store = Arc::new(InMemoryStore::new());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let user = UserId::new("u1");
    let orchestrator = orchestrator_for(provider, store.clone(), vectors.clone(), &user);

    let report = orchestrator.sync_user(&user);
    assert!(report.synced);
    assert_eq!(report.record_count, 20);

    // The pass embedded a batch of freshly ingested entries
    assert!(vectors.count(&user).unwrap() > 0);
    let hits = semantic_search(
        &user,
        "snippet for m3",
        3,
        None,
        &pipeline(),
        store.as_ref(),
        vectors.as_ref(),
    )
    .unwrap();
    assert!(!hits.is_empty());
}
