//! Document mutation events.
//!
//! An event carries exactly enough data to be replayed against the current
//! state of a document. Offsets and lengths count `char`s, not bytes, so the
//! same event means the same thing on every peer regardless of encoding.

use serde::{Deserialize, Serialize};

use crate::document::{ApplyError, Document};

/// One text mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEvent {
    /// Insert `text` so that its first char ends up at `offset`.
    Insert { offset: usize, text: String },
    /// Remove `len` chars starting at `offset`.
    Remove { offset: usize, len: usize },
}

impl TextEvent {
    /// Create an insert event.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::Insert {
            offset,
            text: text.into(),
        }
    }

    /// Create a remove event.
    pub fn remove(offset: usize, len: usize) -> Self {
        Self::Remove { offset, len }
    }

    /// Offset the event is anchored at.
    pub fn offset(&self) -> usize {
        match self {
            Self::Insert { offset, .. } | Self::Remove { offset, .. } => *offset,
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Remove { .. } => "remove",
        }
    }

    /// Replay this event against `doc`.
    pub fn perform(&self, doc: &mut dyn Document) -> Result<(), ApplyError> {
        doc.apply(self)
    }
}
