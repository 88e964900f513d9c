//! Bounded hand-off queue between an interrupt context and a consumer.
//!
//! The producer side never blocks: a push against a full queue drops the
//! sample and reports it, so an interrupt handler can never be stalled by a
//! slow consumer. The consumer side blocks until an element arrives, with a
//! bounded-wait variant for callers that need a timeout.
//!
//! Tracks a single producer and a single consumer; the queue itself is
//! thread-safe either way.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Fixed-capacity FIFO with a non-blocking producer and a blocking consumer.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` elements.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Append `item` if there is room.
    ///
    /// Returns `false` if the queue is full; the item is dropped and it is
    /// up to the caller to emit a diagnostic. Never blocks.
    #[must_use]
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        drop(items);
        self.available.notify_one();
        true
    }

    /// Remove and return the oldest element, blocking until one exists.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.available.wait(items).unwrap();
        }
    }

    /// Remove and return the oldest element, waiting at most `timeout`.
    ///
    /// Returns `None` if nothing arrived in time.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, _) = self.available.wait_timeout(items, remaining).unwrap();
            items = guard;
        }
    }

    /// Discard all queued elements.
    ///
    /// Pipelines call this on activation so a consumer never sees samples
    /// from a previous activation.
    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_preserves_order() {
        let queue = BoundedQueue::new(4);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert_eq!(queue.pop(), 1);
        assert_eq!(queue.pop(), 2);
        assert_eq!(queue.pop(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_to_full_queue_drops_and_reports() {
        let queue = BoundedQueue::new(2);
        assert!(queue.push(10));
        assert!(queue.push(20));
        assert!(!queue.push(30));
        assert_eq!(queue.len(), 2);
        // The dropped element never shows up.
        assert_eq!(queue.pop(), 10);
        assert_eq!(queue.pop(), 20);
    }

    #[test]
    fn pop_blocks_until_producer_pushes() {
        let queue = Arc::new(BoundedQueue::new(1));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(producer.push(42));
        });
        assert_eq!(queue.pop(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn pop_timeout_returns_element_that_arrives_in_time() {
        let queue = Arc::new(BoundedQueue::new(1));
        let producer = Arc::clone(&queue);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            assert!(producer.push(7));
        });
        assert_eq!(queue.pop_timeout(Duration::from_millis(500)), Some(7));
    }

    #[test]
    fn clear_empties_the_queue() {
        let queue = BoundedQueue::new(4);
        assert!(queue.push(1));
        assert!(queue.push(2));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.push(3));
        assert_eq!(queue.pop(), 3);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn zero_capacity_panics() {
        let _ = BoundedQueue::<u8>::new(0);
    }
}
