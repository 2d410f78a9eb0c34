//! Local-capture capability.
//!
//! Every successful document mutation, local or remote, is reported to
//! [`EventCapturer::observe`]. Only mutations the gate allows become
//! outbound events; remote applies run with `performing` set and are
//! therefore never re-captured.

use std::sync::Arc;
use tandem_core::TextEvent;

use crate::gate::CaptureGate;
use crate::outbox::Outbox;

#[derive(Clone)]
pub struct EventCapturer {
    gate: Arc<CaptureGate>,
    outbox: Arc<Outbox>,
}

impl EventCapturer {
    pub fn new(gate: Arc<CaptureGate>, outbox: Arc<Outbox>) -> Self {
        Self { gate, outbox }
    }

    /// Returns whether the event was captured.
    pub fn observe(&self, event: &TextEvent) -> bool {
        if !self.gate.should_capture() {
            log::trace!("Not capturing {} at {}", event.kind(), event.offset());
            return false;
        }
        self.outbox.publish(event, None);
        true
    }

    pub fn gate(&self) -> &Arc<CaptureGate> {
        &self.gate
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }
}
