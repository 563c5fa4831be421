//! A bounded queue that evicts the oldest entry on overflow rather than
//! rejecting the newest, so a Scraper never blocks on Supervisor/Store
//! back-pressure. `tokio::sync::mpsc` can't express this: only the
//! receiving side can drain a channel, and the eviction has to happen on
//! the producer's push.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Push an item, evicting the oldest queued item if already at
    /// capacity. Returns `true` if an item was dropped.
    pub fn push(&self, item: T) -> bool {
        let mut queue = self.inner.lock().expect("drop-oldest queue poisoned");
        let dropped = if queue.len() >= self.capacity {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
        dropped
    }

    /// Await the next item, yielding as soon as one becomes available.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.inner.lock().expect("drop-oldest queue poisoned").pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("drop-oldest queue poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_beyond_capacity_drops_oldest() {
        let queue = DropOldestQueue::new(2);
        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert!(queue.push(3));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pop_returns_items_in_fifo_order() {
        let queue = DropOldestQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop().await, 1);
        assert_eq!(queue.pop().await, 2);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        use std::sync::Arc;
        let queue = Arc::new(DropOldestQueue::new(4));
        let queue2 = queue.clone();
        let handle = tokio::spawn(async move { queue2.pop().await });

        tokio::task::yield_now().await;
        queue.push(42);

        assert_eq!(handle.await.unwrap(), 42);
    }
}
