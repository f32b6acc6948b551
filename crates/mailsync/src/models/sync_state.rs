//! Sync state tracking for incremental mailbox sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// How the remaining backlog is being worked through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogMode {
    /// No backlog outstanding
    #[default]
    None,
    /// Older pages remain; `backlog_cursor` points at the next one
    Paged,
}

/// Tracks sync progress for one user.
///
/// Exactly one record per user. Mutated only by the sync operations and the
/// backlog processor; an administrative reset clears the checkpoint and
/// backlog fields to force a fresh full sync.
///
/// Invariant: `backlog_cursor` is Some iff `backlog_mode == Paged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub user_id: UserId,
    /// Opaque, monotonically advancing change-log position.
    /// None means the user has never been incrementally synced.
    pub checkpoint: Option<String>,
    pub full_sync_completed: bool,
    pub backlog_cursor: Option<String>,
    pub backlog_mode: BacklogMode,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub backlog_last_processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// Fresh state for a user that has never synced
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            checkpoint: None,
            full_sync_completed: false,
            backlog_cursor: None,
            backlog_mode: BacklogMode::None,
            last_synced_at: None,
            backlog_last_processed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether backlog processing is pending for this user
    pub fn has_backlog(&self) -> bool {
        self.backlog_cursor.is_some()
    }

    /// Check the cursor/mode exclusivity invariant
    pub fn is_consistent(&self) -> bool {
        self.backlog_cursor.is_some() == (self.backlog_mode == BacklogMode::Paged)
    }

    /// Administrative reset: forget the checkpoint and backlog so the next
    /// pass performs a fresh full sync.
    pub fn reset(&mut self) {
        self.checkpoint = None;
        self.full_sync_completed = false;
        self.backlog_cursor = None;
        self.backlog_mode = BacklogMode::None;
        self.updated_at = Utc::now();
    }
}

/// Partial update with merge semantics: only fields that are set are
/// written; everything else is untouched.
///
/// `backlog_cursor` is doubly optional so callers can distinguish "leave
/// alone" (None) from "clear" (Some(None)). Applying a cursor update also
/// derives `backlog_mode`, so the exclusivity invariant holds by
/// construction.
#[derive(Debug, Clone, Default)]
pub struct SyncStateUpdate {
    pub checkpoint: Option<String>,
    pub full_sync_completed: Option<bool>,
    pub backlog_cursor: Option<Option<String>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub backlog_last_processed_at: Option<DateTime<Utc>>,
}

impl SyncStateUpdate {
    /// Apply this update to a state record, stamping `updated_at`.
    pub fn apply(self, state: &mut SyncState) {
        if let Some(checkpoint) = self.checkpoint {
            state.checkpoint = Some(checkpoint);
        }
        if let Some(done) = self.full_sync_completed {
            state.full_sync_completed = done;
        }
        if let Some(cursor) = self.backlog_cursor {
            state.backlog_mode = if cursor.is_some() {
                BacklogMode::Paged
            } else {
                BacklogMode::None
            };
            state.backlog_cursor = cursor;
        }
        if let Some(at) = self.last_synced_at {
            state.last_synced_at = Some(at);
        }
        if let Some(at) = self.backlog_last_processed_at {
            state.backlog_last_processed_at = Some(at);
        }
        state.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_consistent() {
        let state = SyncState::new(UserId::new("u1"));
        assert!(state.is_consistent());
        assert!(!state.has_backlog());
        assert!(state.checkpoint.is_none());
    }

    #[test]
    fn test_partial_update_merges() {
        let mut state = SyncState::new(UserId::new("u1"));
        SyncStateUpdate {
            checkpoint: Some("100".to_string()),
            ..Default::default()
        }
        .apply(&mut state);

        assert_eq!(state.checkpoint.as_deref(), Some("100"));
        assert!(!state.full_sync_completed);

        SyncStateUpdate {
            full_sync_completed: Some(true),
            ..Default::default()
        }
        .apply(&mut state);

        // Earlier checkpoint untouched by the second update
        assert_eq!(state.checkpoint.as_deref(), Some("100"));
        assert!(state.full_sync_completed);
    }

    #[test]
    fn test_cursor_update_keeps_mode_in_lockstep() {
        let mut state = SyncState::new(UserId::new("u1"));

        SyncStateUpdate {
            backlog_cursor: Some(Some("page-3".to_string())),
            ..Default::default()
        }
        .apply(&mut state);
        assert_eq!(state.backlog_mode, BacklogMode::Paged);
        assert!(state.is_consistent());

        SyncStateUpdate {
            backlog_cursor: Some(None),
            ..Default::default()
        }
        .apply(&mut state);
        assert_eq!(state.backlog_mode, BacklogMode::None);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_reset_forces_fresh_sync() {
        let mut state = SyncState::new(UserId::new("u1"));
        SyncStateUpdate {
            checkpoint: Some("42".to_string()),
            backlog_cursor: Some(Some("page-2".to_string())),
            full_sync_completed: Some(true),
            ..Default::default()
        }
        .apply(&mut state);

        state.reset();
        assert!(state.checkpoint.is_none());
        assert!(state.backlog_cursor.is_none());
        assert!(!state.full_sync_completed);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_serialization() {
        let state = SyncState::new(UserId::new("u1"));
        let json = serde_json::to_string(&state).unwrap();
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
