use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::model::Event;

/// Bounded, drop-oldest-on-overflow queue backing one event bus subscriber.
///
/// `push` never blocks, which is the whole point: a subscriber that cannot
/// keep up loses its oldest unread events instead of stalling the
/// publisher.
pub struct RingQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: AtomicBool,
}

impl RingQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Push an event, returning `true` if an older event was dropped to
    /// make room.
    pub fn push(&self, event: Event) -> bool {
        let dropped = {
            let mut queue = self.inner.lock();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(event);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Wait for and pop the next event, or `None` once closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            if let Some(event) = self.inner.lock().pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drops_oldest_on_overflow() {
        let queue = RingQueue::new(2);
        assert!(!queue.push(Event::new("a", serde_json::json!({}))));
        assert!(!queue.push(Event::new("b", serde_json::json!({}))));
        assert!(queue.push(Event::new("c", serde_json::json!({}))));

        assert_eq!(queue.recv().await.unwrap().event_type, "b");
        assert_eq!(queue.recv().await.unwrap().event_type, "c");
    }

    #[tokio::test]
    async fn closed_empty_queue_returns_none() {
        let queue = RingQueue::new(2);
        queue.close();
        assert!(queue.recv().await.is_none());
    }
}
