//! # tandem-core — Document model for the Tandem replicated editor
//!
//! The replication layer never looks inside a document. It only needs:
//!
//! - [`TextEvent`] — an immutable, serializable description of one mutation
//! - [`Document`] — something that can `apply` such an event
//!
//! [`TextBuffer`] is the reference document used by the console peer and
//! by the test suites.

pub mod document;
pub mod event;

pub use document::{ApplyError, Document, TextBuffer};
pub use event::TextEvent;
