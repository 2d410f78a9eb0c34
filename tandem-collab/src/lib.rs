//! # tandem-collab — Event replication between editor peers
//!
//! Propagates a FIFO stream of text events between peers over persistent
//! byte streams, applies received events without echoing them back, and
//! survives either side going away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   length-prefixed    ┌──────────────┐
//! │ Replicator A │ ◄──────────────────► │ Replicator B │
//! │  Link        │   bincode records    │  Link        │
//! └──────┬───────┘                      └──────┬───────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────┐                      ┌──────────────┐
//! │ mutation     │                      │ mutation     │
//! │ context + doc│                      │ context + doc│
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Wire format (length prefix + bincode `TextEvent`)
//! - [`queue`] — Blocking, clearable FIFO feeding a send loop
//! - [`gate`] — `capturing` / `performing` flags and the apply guard
//! - [`outbox`] — Fan-out of outbound events to live link queues
//! - [`capture`] — Turns observed mutations into outbound events
//! - [`mutation`] — Single task that owns and mutates the document
//! - [`link`] — Send and receive loops for one connection
//! - [`replicator`] — Connect / disconnect, role, session notifications
//!
//! Conflict resolution is out of scope: each link is an ordered stream and
//! events are replayed exactly as received.

pub mod protocol;
pub mod queue;
pub mod gate;
pub mod outbox;
pub mod capture;
pub mod mutation;
pub mod link;
pub mod replicator;

// Re-exports for convenience
pub use protocol::{FaultKind, ProtocolError};
pub use queue::EventQueue;
pub use gate::{ApplyGuard, CaptureGate, GateFlags};
pub use outbox::{LinkId, Outbox, OutboxStats};
pub use capture::EventCapturer;
pub use mutation::{ApplyStats, EditError, EditorContext, MutationHandle};
pub use link::{DisconnectReason, Link};
pub use replicator::{Replicator, ReplicatorConfig, SessionEvent};
