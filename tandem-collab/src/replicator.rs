//! Replication controller: link lifecycle, role, and capture toggling.
//!
//! ```text
//!                    ┌──────────────── Replicator ────────────────┐
//! host edits ──────► │ MutationHandle ──► Document                │
//!                    │       │                                    │
//!                    │  EventCapturer ──► Outbox ──► Link A ◄─────┼──► peer A
//!                    │                         └──► Link B ◄─────┼──► peer B
//!                    │                                            │
//! SessionEvent ◄──── │ Connected / Disconnected                   │
//!                    └────────────────────────────────────────────┘
//! ```
//!
//! Local capture is on exactly while at least one link is live. In the
//! server role, an event received on one link is forwarded to every other
//! link once it has been applied locally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tandem_core::{Document, TextEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::EventCapturer;
use crate::gate::CaptureGate;
use crate::link::{DisconnectReason, Link};
use crate::mutation::{ApplyStats, EditError, MutationHandle};
use crate::outbox::{LinkId, Outbox, OutboxStats};
use crate::queue::EventQueue;

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct ReplicatorConfig {
    /// Forward events received on one link to every other link.
    /// Fixed for the lifetime of the replicator.
    pub is_server: bool,
}

impl ReplicatorConfig {
    pub fn server() -> Self {
        Self { is_server: true }
    }
}

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { link_id: LinkId },
    /// Sent exactly once per link.
    Disconnected {
        link_id: LinkId,
        reason: DisconnectReason,
    },
}

struct Shared {
    config: ReplicatorConfig,
    gate: Arc<CaptureGate>,
    outbox: Arc<Outbox>,
    mutation: MutationHandle,
    links: Mutex<HashMap<LinkId, Link>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl Shared {
    fn links(&self) -> MutexGuard<'_, HashMap<LinkId, Link>> {
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tear one link down. Only the caller that removes the link from the
    /// map does any work, so racing callers produce a single notification.
    fn teardown(&self, link_id: LinkId, reason: DisconnectReason) -> Option<Link> {
        let link = self.links().remove(&link_id)?;

        let discarded = self.outbox.unregister(&link_id).unwrap_or(0);
        if self.mutation.sync_capture().is_err() {
            self.gate.set_capturing(false);
        }
        link.shutdown();

        log::info!("Link {link_id} disconnected ({reason:?}), {discarded} unsent events discarded");
        let _ = self.event_tx.send(SessionEvent::Disconnected { link_id, reason });
        Some(link)
    }
}

/// Cloneable handle to one replication session.
#[derive(Clone)]
pub struct Replicator {
    shared: Arc<Shared>,
}

impl Replicator {
    /// Create a replicator around `document`. Must be called from within a
    /// tokio runtime.
    pub fn new(config: ReplicatorConfig, document: impl Document + 'static) -> Self {
        let gate = Arc::new(CaptureGate::new());
        let outbox = Arc::new(Outbox::new());
        let capturer = EventCapturer::new(gate.clone(), outbox.clone());
        let mutation = MutationHandle::spawn(Box::new(document), capturer);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                config,
                gate,
                outbox,
                mutation,
                links: Mutex::new(HashMap::new()),
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
            }),
        }
    }

    /// Take the session event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.shared
            .event_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Start replicating over an established stream.
    ///
    /// The new link starts with an empty queue, so nothing captured before
    /// this call is sent to the new peer.
    pub async fn connect<S>(&self, stream: S) -> Result<LinkId, EditError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = &self.shared;
        let link_id = Uuid::new_v4();
        let queue = Arc::new(EventQueue::new());
        shared.outbox.register(link_id, queue.clone());

        {
            // Hold the map lock across spawn so a link that faults at once
            // still finds itself registered when it tears down, and so
            // `Connected` always precedes that link's `Disconnected`.
            let mut links = shared.links();
            let _ = shared.event_tx.send(SessionEvent::Connected { link_id });
            let weak: Weak<Shared> = Arc::downgrade(shared);
            let link = Link::spawn(
                link_id,
                stream,
                queue,
                shared.mutation.clone(),
                shared.config.is_server,
                move |reason| {
                    if let Some(shared) = weak.upgrade() {
                        shared.teardown(link_id, reason);
                    }
                },
            );
            links.insert(link_id, link);
        }
        log::info!("Link {link_id} connected (server role: {})", shared.config.is_server);

        shared.mutation.run(|ctx| ctx.sync_capture()).await?;
        Ok(link_id)
    }

    /// [`Replicator::connect`] for a TCP stream, with Nagle disabled since
    /// every event is flushed on its own.
    pub async fn connect_tcp(&self, stream: TcpStream) -> Result<LinkId, EditError> {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Could not disable Nagle: {e}");
        }
        match stream.peer_addr() {
            Ok(addr) => log::info!("Connecting to peer {addr}"),
            Err(e) => log::debug!("Peer address unavailable: {e}"),
        }
        self.connect(stream).await
    }

    /// Disconnect one link. Returns `false` if it was already gone.
    pub fn disconnect_link(&self, link_id: LinkId) -> bool {
        self.shared
            .teardown(link_id, DisconnectReason::Requested)
            .is_some()
    }

    /// Disconnect every live link. Safe to call repeatedly; returns the
    /// number of links this call tore down.
    pub fn disconnect(&self) -> usize {
        self.link_ids()
            .into_iter()
            .filter(|id| self.disconnect_link(*id))
            .count()
    }

    /// Disconnect every live link and wait for their tasks to exit.
    pub async fn close(&self) {
        let ids = self.link_ids();
        let mut closed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(link) = self.shared.teardown(id, DisconnectReason::Requested) {
                closed.push(link);
            }
        }
        for link in closed {
            link.join().await;
        }
    }

    /// Apply a locally originated edit. Returns whether it was captured
    /// for sending.
    pub async fn local_edit(&self, event: TextEvent) -> Result<bool, EditError> {
        self.shared.mutation.local_edit(event).await
    }

    pub async fn content(&self) -> Result<String, EditError> {
        self.shared.mutation.content().await
    }

    pub async fn apply_stats(&self) -> Result<ApplyStats, EditError> {
        self.shared.mutation.stats().await
    }

    pub fn mutation(&self) -> &MutationHandle {
        &self.shared.mutation
    }

    pub fn gate(&self) -> &CaptureGate {
        &self.shared.gate
    }

    pub fn is_server(&self) -> bool {
        self.shared.config.is_server
    }

    pub fn link_ids(&self) -> Vec<LinkId> {
        self.shared.links().keys().copied().collect()
    }

    pub fn link_count(&self) -> usize {
        self.shared.links().len()
    }

    pub fn is_connected(&self) -> bool {
        self.link_count() > 0
    }

    pub fn outbox_stats(&self) -> OutboxStats {
        self.shared.outbox.stats()
    }
}
