//! Blocking FIFO hand-off between event capture and a link's send loop.
//!
//! ```text
//! capture ──push()──► [ e1 | e2 | e3 ] ──take().await──► send loop
//!                          ▲
//!                       clear()   (point-in-time discard)
//! ```
//!
//! `push` never blocks, so a slow link builds a backlog instead of stalling
//! the editor. `take` suspends until an element is available and is
//! cancel-safe: dropping the future (e.g. losing a `select!` race against a
//! shutdown signal) never loses an element.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

pub struct EventQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panic while holding this lock cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the tail.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Remove and return the head, waiting until one exists.
    pub async fn take(&self) -> T {
        loop {
            if let Some(item) = self.try_take() {
                return item;
            }
            // `notify_one` stores a permit when nobody is waiting, so a push
            // landing between the check above and this await is not lost.
            self.available.notified().await;
        }
    }

    /// Remove and return the head if there is one.
    pub fn try_take(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Discard everything queued right now. Pushes that happen after this
    /// returns are kept. Returns the number of discarded elements.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EventQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        for i in 0..5 {
            assert_eq!(queue.take().await, i);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_take_waits_for_push() {
        let queue = Arc::new(EventQueue::new());
        let taker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!taker.is_finished());

        queue.push("late");
        let got = timeout(Duration::from_secs(1), taker).await.unwrap().unwrap();
        assert_eq!(got, "late");
    }

    #[tokio::test]
    async fn test_cancelled_take_loses_nothing() {
        let queue = EventQueue::new();
        let result = timeout(Duration::from_millis(10), queue.take()).await;
        assert!(result.is_err());

        queue.push(7);
        assert_eq!(queue.take().await, 7);
    }

    #[test]
    fn test_clear_is_point_in_time() {
        let queue = EventQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());

        queue.push("c");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_take(), Some("c"));
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(EventQueue::new());
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..100u32 {
                    queue.push((p, i));
                }
            }));
        }
        for handle in producers {
            handle.await.unwrap();
        }

        let mut last = [None::<u32>; 4];
        for _ in 0..400 {
            let (p, i) = queue.take().await;
            if let Some(prev) = last[p as usize] {
                assert!(i > prev);
            }
            last[p as usize] = Some(i);
        }
    }
}
