//! Domain models for the sync engine

mod ids;
mod label;
mod record;
mod search_entry;
mod sync_state;

pub use ids::{MessageId, ThreadId, UserId};
pub use label::{Label, LabelOrigin};
pub use record::{Attachment, CanonicalRecord, EmailAddress, RecordBuilder};
pub use search_entry::SearchIndexEntry;
pub use sync_state::{BacklogMode, SyncState, SyncStateUpdate};
