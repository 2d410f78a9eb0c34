//! One live peer connection: a send loop and a receive loop.
//!
//! ```text
//!             ┌────────────── Link ───────────────┐
//! EventQueue ─┼─► send loop ──write_event──► stream ─┼─► peer
//!             │                                   │
//! Mutation  ◄─┼── recv loop ◄──read_event── stream ◄─┼── peer
//!             │         ▲               ▲         │
//!             │         └── shutdown ───┘         │
//!             └───────────────────────────────────┘
//! ```
//!
//! Both loops watch the same shutdown signal, owned by the Link, so
//! tearing the Link down stops both. Receive loop states:
//! `AwaitingEvent → Decoded → (scheduled apply) → AwaitingEvent`, ending in
//! `Closed` on shutdown or on the first transport/decode fault. Faults are
//! never retried.

use std::sync::Arc;
use tandem_core::TextEvent;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::mutation::MutationHandle;
use crate::outbox::LinkId;
use crate::protocol::{self, FaultKind, ProtocolError};
use crate::queue::EventQueue;

/// Why a link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called locally.
    Requested,
    /// The stream failed or the peer closed it.
    Transport(String),
    /// The peer sent bytes that did not decode.
    Decode(String),
    /// The mutation context stopped, so received events can no longer be
    /// applied.
    ContextClosed,
}

impl From<ProtocolError> for DisconnectReason {
    fn from(e: ProtocolError) -> Self {
        match e.fault_kind() {
            FaultKind::Transport => Self::Transport(e.to_string()),
            FaultKind::Decode => Self::Decode(e.to_string()),
        }
    }
}

pub struct Link {
    id: LinkId,
    shutdown: watch::Sender<bool>,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl Link {
    /// Start both loops over `stream`.
    ///
    /// `on_fault` runs at most once, on the receive task, when the stream
    /// fails, delivers undecodable bytes, or the mutation context is gone.
    /// It does not run after a requested [`Link::shutdown`].
    pub fn spawn<S, F>(
        id: LinkId,
        stream: S,
        queue: Arc<EventQueue<TextEvent>>,
        mutation: MutationHandle,
        forward: bool,
        on_fault: F,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce(DisconnectReason) + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (shutdown, _) = watch::channel(false);

        let send_task = tokio::spawn(send_loop(id, writer, queue, shutdown.subscribe()));
        let recv_task = tokio::spawn(recv_loop(
            id,
            reader,
            mutation,
            forward,
            shutdown.subscribe(),
            on_fault,
        ));

        log::debug!("Link {id} started (forwarding: {forward})");
        Self {
            id,
            shutdown,
            send_task,
            recv_task,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Signal both loops to stop. Returns `false` if already signalled.
    pub fn shutdown(&self) -> bool {
        !self.shutdown.send_replace(true)
    }

    pub fn is_finished(&self) -> bool {
        self.send_task.is_finished() && self.recv_task.is_finished()
    }

    /// Wait for both loops to exit.
    pub async fn join(self) {
        let Self {
            id,
            shutdown,
            send_task,
            recv_task,
        } = self;
        if let Err(e) = send_task.await {
            log::warn!("Send task for link {id} ended abnormally: {e}");
        }
        if let Err(e) = recv_task.await {
            log::warn!("Receive task for link {id} ended abnormally: {e}");
        }
        drop(shutdown);
    }
}

async fn send_loop<W>(
    id: LinkId,
    mut writer: W,
    queue: Arc<EventQueue<TextEvent>>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = async {
                let event = queue.take().await;
                protocol::write_event(&mut writer, &event).await
            } => {
                if let Err(e) = result {
                    // The receive side observes and reports the disconnect.
                    log::debug!("Send loop for link {id} stopped: {e}");
                    break;
                }
                sent += 1;
            }
        }
    }
    let _ = writer.shutdown().await;
    log::debug!("Send loop for link {id} closed after {sent} events");
}

async fn recv_loop<R, F>(
    id: LinkId,
    mut reader: R,
    mutation: MutationHandle,
    forward: bool,
    mut shutdown: watch::Receiver<bool>,
    on_fault: F,
) where
    R: AsyncRead + Unpin,
    F: FnOnce(DisconnectReason),
{
    let mut received: u64 = 0;
    let fault = loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.changed() => break None,
            result = protocol::read_event(&mut reader) => result,
        };
        match result {
            Ok(event) => {
                received += 1;
                log::trace!("Link {id} received {} at {}", event.kind(), event.offset());
                if mutation.apply_remote(event, id, forward).is_err() {
                    log::warn!("Link {id} dropping input: mutation context closed");
                    break Some(DisconnectReason::ContextClosed);
                }
            }
            Err(e) => {
                match e.fault_kind() {
                    FaultKind::Transport => log::info!("Link {id} lost: {e}"),
                    FaultKind::Decode => log::warn!("Link {id} sent a corrupt record: {e}"),
                }
                break Some(e.into());
            }
        }
    };

    log::debug!("Receive loop for link {id} closed after {received} events");
    if let Some(reason) = fault {
        on_fault(reason);
    }
}
