//! Fan-out of outbound events to every live link's queue.
//!
//! ```text
//!                          ┌──► EventQueue (link A) ──► send loop A
//! capture / forward ──► Outbox
//!                          └──► EventQueue (link B) ──► send loop B
//! ```
//!
//! Locally captured events go to every link. Forwarded events skip the link
//! they arrived on, so a forwarding node passes an event along a chain of
//! peers without ever handing it back to its origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_core::TextEvent;
use uuid::Uuid;

use crate::queue::EventQueue;

/// Identifies one link for its whole lifetime.
pub type LinkId = Uuid;

/// Counters for monitoring fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxStats {
    /// Calls to `publish`.
    pub published: u64,
    /// Queue pushes performed across all links.
    pub delivered: u64,
    pub active_links: usize,
}

#[derive(Default)]
pub struct Outbox {
    queues: Mutex<HashMap<LinkId, Arc<EventQueue<TextEvent>>>>,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LinkId, Arc<EventQueue<TextEvent>>>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a link queue. The queue is cleared first so the link starts
    /// without any stale history.
    pub fn register(&self, link_id: LinkId, queue: Arc<EventQueue<TextEvent>>) {
        let stale = queue.clear();
        if stale > 0 {
            log::debug!("Discarded {stale} stale events before registering link {link_id}");
        }
        self.lock().insert(link_id, queue);
    }

    /// Remove a link queue and discard whatever it had not sent yet.
    /// Returns the number of discarded events, or `None` if the link was not
    /// registered.
    pub fn unregister(&self, link_id: &LinkId) -> Option<usize> {
        let queue = self.lock().remove(link_id)?;
        Some(queue.clear())
    }

    /// Push `event` to every registered queue except `except`.
    /// Returns the number of queues it was pushed to.
    pub fn publish(&self, event: &TextEvent, except: Option<LinkId>) -> usize {
        let queues = self.lock();
        let mut count = 0;
        for (link_id, queue) in queues.iter() {
            if Some(*link_id) == except {
                continue;
            }
            queue.push(event.clone());
            count += 1;
        }
        drop(queues);

        self.published.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn link_count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, link_id: &LinkId) -> bool {
        self.lock().contains_key(link_id)
    }

    pub fn stats(&self) -> OutboxStats {
        OutboxStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            active_links: self.link_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<EventQueue<TextEvent>> {
        Arc::new(EventQueue::new())
    }

    #[test]
    fn test_publish_reaches_every_link() {
        let outbox = Outbox::new();
        let (a, b) = (queue(), queue());
        outbox.register(Uuid::new_v4(), a.clone());
        outbox.register(Uuid::new_v4(), b.clone());

        let event = TextEvent::insert(0, "x");
        assert_eq!(outbox.publish(&event, None), 2);
        assert_eq!(a.try_take(), Some(event.clone()));
        assert_eq!(b.try_take(), Some(event));
    }

    #[test]
    fn test_publish_skips_origin() {
        let outbox = Outbox::new();
        let (origin, other) = (Uuid::new_v4(), Uuid::new_v4());
        let (qa, qb) = (queue(), queue());
        outbox.register(origin, qa.clone());
        outbox.register(other, qb.clone());

        assert_eq!(outbox.publish(&TextEvent::insert(0, "x"), Some(origin)), 1);
        assert!(qa.is_empty());
        assert_eq!(qb.len(), 1);
    }

    #[test]
    fn test_publish_without_links_is_dropped() {
        let outbox = Outbox::new();
        assert_eq!(outbox.publish(&TextEvent::insert(0, "x"), None), 0);
        let stats = outbox.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn test_register_clears_stale_events() {
        let outbox = Outbox::new();
        let q = queue();
        q.push(TextEvent::insert(0, "stale"));
        outbox.register(Uuid::new_v4(), q.clone());
        assert!(q.is_empty());
    }

    #[test]
    fn test_unregister_discards_backlog() {
        let outbox = Outbox::new();
        let id = Uuid::new_v4();
        let q = queue();
        outbox.register(id, q.clone());
        outbox.publish(&TextEvent::insert(0, "a"), None);
        outbox.publish(&TextEvent::insert(1, "b"), None);

        assert_eq!(outbox.unregister(&id), Some(2));
        assert!(q.is_empty());
        assert!(!outbox.contains(&id));
        assert_eq!(outbox.unregister(&id), None);
    }

    #[test]
    fn test_stats() {
        let outbox = Outbox::new();
        outbox.register(Uuid::new_v4(), queue());
        outbox.register(Uuid::new_v4(), queue());
        outbox.publish(&TextEvent::insert(0, "a"), None);
        outbox.publish(&TextEvent::insert(0, "b"), None);

        assert_eq!(
            outbox.stats(),
            OutboxStats {
                published: 2,
                delivered: 4,
                active_links: 2
            }
        );
    }
}
