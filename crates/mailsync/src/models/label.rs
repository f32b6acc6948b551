//! Label catalog model
//!
//! Labels come from two places: the provider's native set (INBOX, SENT,
//! UNREAD, ...) and the user's locally defined organizational labels.
//! The distinction matters during re-sync: locally managed labels must
//! survive a provider-side label overwrite (see the parser's label merge).

use serde::{Deserialize, Serialize};

/// Where a label is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOrigin {
    /// Native to the remote provider
    Provider,
    /// Defined locally by the user (board columns, custom tags)
    Local,
}

/// A label in a user's catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub origin: LabelOrigin,
}

impl Label {
    pub fn provider(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            origin: LabelOrigin::Provider,
        }
    }

    pub fn local(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            origin: LabelOrigin::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == LabelOrigin::Local
    }
}
