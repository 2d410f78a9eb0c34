//! Capture/perform mode flags.
//!
//! `capturing` says whether local edits become outbound events.
//! `performing` says whether an event is being mechanically applied right
//! now. While performing, the mutation signal raised by that apply must not
//! be captured, otherwise a received event would bounce straight back to the
//! peer it came from.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateFlags {
    pub capturing: bool,
    pub performing: bool,
}

/// Both flags behind one lock.
#[derive(Debug, Default)]
pub struct CaptureGate {
    flags: Mutex<GateFlags>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateFlags> {
        self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_capturing(&self, capturing: bool) {
        self.lock().capturing = capturing;
    }

    pub fn set_performing(&self, performing: bool) {
        self.lock().performing = performing;
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    pub fn is_performing(&self) -> bool {
        self.lock().performing
    }

    pub fn flags(&self) -> GateFlags {
        *self.lock()
    }

    /// Whether a mutation observed right now should become an outbound event.
    pub fn should_capture(&self) -> bool {
        let flags = self.lock();
        flags.capturing && !flags.performing
    }

    /// Enter apply mode: `performing = true, capturing = false`, set in one
    /// critical section. The previous pair is restored when the guard drops,
    /// on every exit path including unwinding.
    pub fn enter_apply(&self) -> ApplyGuard<'_> {
        let mut flags = self.lock();
        let saved = *flags;
        flags.performing = true;
        flags.capturing = false;
        ApplyGuard { gate: self, saved }
    }
}

/// Restores the gate flags saved by [`CaptureGate::enter_apply`].
#[must_use = "the gate leaves apply mode as soon as the guard is dropped"]
pub struct ApplyGuard<'a> {
    gate: &'a CaptureGate,
    saved: GateFlags,
}

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        *self.gate.lock() = self.saved;
    }
}
