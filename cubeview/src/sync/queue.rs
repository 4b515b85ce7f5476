//! Mutex-protected FIFO queue.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Thread-safe FIFO queue with non-blocking pop.
#[derive(Debug)]
pub struct ConcurrentQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ConcurrentQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append to the back.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Remove from the front, if anything is queued.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Drop everything queued.
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Replace the whole queue with a single item.
    pub fn replace(&self, item: T) {
        let mut items = self.items.lock();
        items.clear();
        items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = ConcurrentQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_empty() {
        let queue: ConcurrentQueue<u8> = ConcurrentQueue::default();
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_and_replace() {
        let queue = ConcurrentQueue::new();
        queue.push("a");
        queue.push("b");
        queue.replace("c");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop(), Some("c"));

        queue.push("d");
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_pushes() {
        let queue = Arc::new(ConcurrentQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut popped = 0;
        while queue.try_pop().is_some() {
            popped += 1;
        }
        assert_eq!(popped, 1000);
    }
}
