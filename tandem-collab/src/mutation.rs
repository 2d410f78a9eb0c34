//! Single serialized mutation context.
//!
//! The document is owned by one task. Everything that touches it, local
//! edits from the host and remote events from every link, is sent to that
//! task as a job and runs to completion before the next job starts:
//!
//! ```text
//! host edit ───┐
//! link A recv ─┼──► job channel ──► [ mutation task ] ──► Document
//! link B recv ─┘                          │
//!                                         └──► EventCapturer ──► Outbox
//! ```
//!
//! Network tasks never mutate the document directly, so no lock is needed
//! around document internals, and events are applied strictly in the order
//! they were scheduled.

use std::sync::Arc;
use tandem_core::{ApplyError, Document, TextEvent};
use tokio::sync::{mpsc, oneshot};

use crate::capture::EventCapturer;
use crate::gate::CaptureGate;
use crate::outbox::{LinkId, Outbox};

type Job = Box<dyn FnOnce(&mut EditorContext) + Send>;

/// Errors surfaced to callers of [`MutationHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// The event was rejected by the document.
    Apply(ApplyError),
    /// The mutation task is gone.
    ContextClosed,
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply(e) => write!(f, "Edit rejected: {e}"),
            Self::ContextClosed => write!(f, "Mutation context closed"),
        }
    }
}

impl std::error::Error for EditError {}

impl From<ApplyError> for EditError {
    fn from(e: ApplyError) -> Self {
        Self::Apply(e)
    }
}

/// Remote-apply counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: u64,
    pub rejected: u64,
    pub forwarded: u64,
}

/// State owned by the mutation task. Jobs get exclusive access to it.
pub struct EditorContext {
    document: Box<dyn Document>,
    capturer: EventCapturer,
    stats: ApplyStats,
}

impl EditorContext {
    fn new(document: Box<dyn Document>, capturer: EventCapturer) -> Self {
        Self {
            document,
            capturer,
            stats: ApplyStats::default(),
        }
    }

    pub fn document(&self) -> &dyn Document {
        self.document.as_ref()
    }

    pub fn stats(&self) -> ApplyStats {
        self.stats
    }

    fn gate(&self) -> &Arc<CaptureGate> {
        self.capturer.gate()
    }

    fn outbox(&self) -> &Arc<Outbox> {
        self.capturer.outbox()
    }

    /// Apply a locally originated edit and capture it if the gate allows.
    /// Returns whether it was captured.
    pub fn apply_local(&mut self, event: &TextEvent) -> Result<bool, ApplyError> {
        self.document.apply(event)?;
        Ok(self.capturer.observe(event))
    }

    /// Apply an event received from a peer. The mutation signal it raises is
    /// reported to the capturer while the gate is in apply mode, so it is
    /// never captured as a new local event.
    pub fn apply_remote(&mut self, event: &TextEvent) -> Result<(), ApplyError> {
        let gate = Arc::clone(self.gate());
        let _guard = gate.enter_apply();
        self.document.apply(event)?;
        self.capturer.observe(event);
        Ok(())
    }

    /// Apply a remote event with per-event fault isolation, then forward it
    /// to every other link when `forward` is set.
    fn receive(&mut self, event: TextEvent, origin: LinkId, forward: bool) {
        match self.apply_remote(&event) {
            Ok(()) => {
                self.stats.applied += 1;
                if forward {
                    let sent = self.outbox().publish(&event, Some(origin));
                    if sent > 0 {
                        self.stats.forwarded += 1;
                    }
                    log::debug!("Forwarded {} from link {origin} to {sent} links", event.kind());
                }
            }
            // Rejected events are never forwarded, unlike a relay that passes
            // on whatever it received: downstream peers only get events this
            // replica actually holds.
            Err(e) => {
                self.stats.rejected += 1;
                log::warn!(
                    "Skipping {} at offset {} from link {origin}: {e}",
                    event.kind(),
                    event.offset()
                );
            }
        }
    }

    /// Capture is on exactly when there is at least one link to send to.
    pub(crate) fn sync_capture(&self) {
        let connected = self.outbox().link_count() > 0;
        self.gate().set_capturing(connected);
        log::debug!("Local capture {}", if connected { "enabled" } else { "disabled" });
    }
}

/// Cheap, cloneable handle to the mutation task.
#[derive(Clone)]
pub struct MutationHandle {
    jobs: mpsc::UnboundedSender<Job>,
}

impl MutationHandle {
    /// Spawn the mutation task. Must be called from within a tokio runtime.
    /// The task exits once every handle has been dropped.
    pub fn spawn(document: Box<dyn Document>, capturer: EventCapturer) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let mut context = EditorContext::new(document, capturer);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(&mut context);
            }
            log::debug!("Mutation context stopped");
        });
        Self { jobs }
    }

    /// Queue a job without waiting for it.
    pub fn schedule<F>(&self, job: F) -> Result<(), EditError>
    where
        F: FnOnce(&mut EditorContext) + Send + 'static,
    {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| EditError::ContextClosed)
    }

    /// Run a job and wait for its result.
    pub async fn run<F, R>(&self, job: F) -> Result<R, EditError>
    where
        F: FnOnce(&mut EditorContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.schedule(move |ctx| {
            let _ = tx.send(job(ctx));
        })?;
        rx.await.map_err(|_| EditError::ContextClosed)
    }

    /// Apply a local edit. Returns whether it was captured for sending.
    pub async fn local_edit(&self, event: TextEvent) -> Result<bool, EditError> {
        Ok(self.run(move |ctx| ctx.apply_local(&event)).await??)
    }

    /// Schedule a received event. Apply faults are logged and skipped inside
    /// the task; they never reach the caller.
    pub fn apply_remote(&self, event: TextEvent, origin: LinkId, forward: bool) -> Result<(), EditError> {
        self.schedule(move |ctx| ctx.receive(event, origin, forward))
    }

    /// Re-evaluate whether local capture should be on.
    pub fn sync_capture(&self) -> Result<(), EditError> {
        self.schedule(|ctx| ctx.sync_capture())
    }

    pub async fn content(&self) -> Result<String, EditError> {
        self.run(|ctx| ctx.document().content()).await
    }

    pub async fn stats(&self) -> Result<ApplyStats, EditError> {
        self.run(|ctx| ctx.stats()).await
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EventQueue;
    use tandem_core::TextBuffer;
    use uuid::Uuid;

    struct Fixture {
        handle: MutationHandle,
        gate: Arc<CaptureGate>,
        outbox: Arc<Outbox>,
    }

    fn fixture(text: &str) -> Fixture {
        let gate = Arc::new(CaptureGate::new());
        let outbox = Arc::new(Outbox::new());
        let capturer = EventCapturer::new(gate.clone(), outbox.clone());
        let handle = MutationHandle::spawn(Box::new(TextBuffer::with_text(text)), capturer);
        Fixture {
            handle,
            gate,
            outbox,
        }
    }

    fn link(outbox: &Outbox) -> (LinkId, Arc<EventQueue<TextEvent>>) {
        let id = Uuid::new_v4();
        let queue = Arc::new(EventQueue::new());
        outbox.register(id, queue.clone());
        (id, queue)
    }

    #[tokio::test]
    async fn test_local_edit_captured_when_capturing() {
        let f = fixture("");
        let (_, queue) = link(&f.outbox);
        f.gate.set_capturing(true);

        assert!(f.handle.local_edit(TextEvent::insert(0, "a")).await.unwrap());
        assert_eq!(f.handle.content().await.unwrap(), "a");
        assert_eq!(queue.try_take(), Some(TextEvent::insert(0, "a")));
    }

    #[tokio::test]
    async fn test_local_edit_not_captured_when_idle() {
        let f = fixture("");
        let (_, queue) = link(&f.outbox);

        assert!(!f.handle.local_edit(TextEvent::insert(0, "a")).await.unwrap());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_local_edit_reports_error() {
        let f = fixture("ab");
        let err = f.handle.local_edit(TextEvent::remove(1, 5)).await.unwrap_err();
        assert!(matches!(err, EditError::Apply(ApplyError::OutOfRange { .. })));
        assert_eq!(f.handle.content().await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_remote_apply_is_not_echoed() {
        let f = fixture("");
        let (origin, queue) = link(&f.outbox);
        f.gate.set_capturing(true);

        f.handle.apply_remote(TextEvent::insert(0, "a"), origin, false).unwrap();
        f.handle.apply_remote(TextEvent::insert(1, "b"), origin, false).unwrap();

        assert_eq!(f.handle.content().await.unwrap(), "ab");
        assert!(queue.is_empty());
        assert!(f.gate.is_capturing());
        assert!(!f.gate.is_performing());
    }

    #[tokio::test]
    async fn test_gate_is_suppressed_while_applying() {
        struct Probe {
            gate: Arc<CaptureGate>,
            seen: Arc<std::sync::Mutex<Vec<(bool, bool)>>>,
        }
        impl Document for Probe {
            fn apply(&mut self, _: &TextEvent) -> Result<(), ApplyError> {
                let flags = self.gate.flags();
                self.seen.lock().unwrap().push((flags.capturing, flags.performing));
                Ok(())
            }
            fn content(&self) -> String {
                String::new()
            }
            fn len(&self) -> usize {
                0
            }
        }

        let gate = Arc::new(CaptureGate::new());
        gate.set_capturing(true);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let capturer = EventCapturer::new(gate.clone(), Arc::new(Outbox::new()));
        let handle = MutationHandle::spawn(
            Box::new(Probe {
                gate: gate.clone(),
                seen: seen.clone(),
            }),
            capturer,
        );

        handle.apply_remote(TextEvent::insert(0, "x"), Uuid::new_v4(), false).unwrap();
        handle.content().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(false, true)]);
        assert!(gate.is_capturing());
    }

    #[tokio::test]
    async fn test_faulty_event_is_skipped() {
        let f = fixture("");
        let origin = Uuid::new_v4();

        f.handle.apply_remote(TextEvent::insert(0, "a"), origin, false).unwrap();
        f.handle.apply_remote(TextEvent::insert(10, "bad"), origin, false).unwrap();
        f.handle.apply_remote(TextEvent::insert(1, "b"), origin, false).unwrap();

        assert_eq!(f.handle.content().await.unwrap(), "ab");
        let stats = f.handle.stats().await.unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_forward_skips_origin() {
        let f = fixture("");
        let (origin, origin_queue) = link(&f.outbox);
        let (_, other_queue) = link(&f.outbox);

        f.handle.apply_remote(TextEvent::insert(0, "a"), origin, true).unwrap();
        f.handle.content().await.unwrap();

        assert!(origin_queue.is_empty());
        assert_eq!(other_queue.try_take(), Some(TextEvent::insert(0, "a")));
        assert_eq!(f.handle.stats().await.unwrap().forwarded, 1);
    }

    #[tokio::test]
    async fn test_rejected_event_is_not_forwarded() {
        let f = fixture("");
        let (origin, _) = link(&f.outbox);
        let (_, other_queue) = link(&f.outbox);

        f.handle.apply_remote(TextEvent::remove(0, 3), origin, true).unwrap();
        f.handle.content().await.unwrap();
        assert!(other_queue.is_empty());
    }

    #[tokio::test]
    async fn test_forward_with_no_other_link_is_not_counted() {
        let f = fixture("");
        let (origin, origin_queue) = link(&f.outbox);

        f.handle.apply_remote(TextEvent::insert(0, "a"), origin, true).unwrap();
        let stats = f.handle.stats().await.unwrap();

        assert!(origin_queue.is_empty());
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.forwarded, 0);
    }

    #[tokio::test]
    async fn test_handle_closes_when_task_stops() {
        let f = fixture("");
        assert!(!f.handle.is_closed());
        // A panicking job takes the task down with it.
        f.handle.schedule(|_| panic!("job failed")).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !f.handle.is_closed() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.handle.content().await, Err(EditError::ContextClosed));
    }

    #[tokio::test]
    async fn test_sync_capture_follows_link_count() {
        let f = fixture("");
        f.handle.sync_capture().unwrap();
        f.handle.content().await.unwrap();
        assert!(!f.gate.is_capturing());

        let (id, _) = link(&f.outbox);
        f.handle.sync_capture().unwrap();
        f.handle.content().await.unwrap();
        assert!(f.gate.is_capturing());

        f.outbox.unregister(&id);
        f.handle.sync_capture().unwrap();
        f.handle.content().await.unwrap();
        assert!(!f.gate.is_capturing());
    }
}
