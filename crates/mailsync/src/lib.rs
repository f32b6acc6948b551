//! mailsync - Mail synchronization and indexing engine
//!
//! Mirrors a user's remote mailbox into a local store, keeping it
//! incrementally consistent, searchable, and semantically indexed, while
//! bounding per-run work so a sync pass never blocks interactive use.
//!
//! This crate provides:
//! - Domain models (CanonicalRecord, SearchIndexEntry, SyncState)
//! - A provider abstraction with an HTTP client and typed errors
//! - Tolerant message normalization with additive label merging
//! - Storage trait abstractions (in-memory and SQLite backends)
//! - The three cursor-driven sync operations (incremental, recent-first,
//!   backlog) and the orchestrator loops that drive them
//! - A batch embedding pipeline and lazily rebuilt semantic search

pub mod config;
pub mod embed;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod provider;
pub mod semantic;
pub mod store;
pub mod sync;
pub mod vector;

pub use config::SyncConfig;
pub use embed::{Embedder, EmbeddingPipeline, HashEmbedder, HttpEmbedder};
pub use models::{
    Attachment, BacklogMode, CanonicalRecord, EmailAddress, Label, LabelOrigin, MessageId,
    SearchIndexEntry, SyncState, SyncStateUpdate, ThreadId, UserId,
};
pub use orchestrator::{Orchestrator, SyncReport};
pub use parser::{ParsedMessage, merge_labels, parse_message};
pub use provider::{
    DEFAULT_BASE_URL, HttpMailProvider, HttpSessionFactory, InMemoryProvider,
    InMemorySessionFactory, MailProvider, ProviderError, SessionFactory, StaticTokenSource,
    TokenSource,
};
pub use semantic::{SemanticHit, semantic_search};
pub use store::{InMemoryStore, RecordStore, SqliteStore, SyncStateStore};
pub use sync::{
    BacklogOutcome, IncrementalOutcome, RecentSyncOutcome, SyncStats, max_checkpoint,
    process_backlog, smart_recent_first, sync_from_history,
};
pub use vector::{InMemoryVectorStore, ScoredId, VectorRecord, VectorStore};
