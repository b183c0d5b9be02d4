//! Fixed-capacity rolling history buffer
//!
//! Replaces ad-hoc shift/push arrays for PnL history: pushing into a full
//! buffer drops the oldest entry. Snapshots are ordered oldest → newest.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ring buffer with a fixed capacity. `push` on a full buffer evicts the
/// oldest element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RingBuffer<T> {
    capacity: usize,
    buf: VecDeque<T>,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    /// Create a buffer pre-filled to capacity with copies of `value`.
    pub fn filled(capacity: usize, value: T) -> Self {
        let mut rb = Self::new(capacity);
        for _ in 0..capacity {
            rb.buf.push_back(value.clone());
        }
        rb
    }

    pub fn push(&mut self, value: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    /// Ordered view, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.buf.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut rb = RingBuffer::new(3);
        rb.push(1);
        rb.push(2);
        rb.push(3);
        rb.push(4);

        assert_eq!(rb.len(), 3);
        assert_eq!(rb.snapshot(), vec![2, 3, 4]);
        assert_eq!(rb.oldest(), Some(&2));
        assert_eq!(rb.latest(), Some(&4));
    }

    #[test]
    fn test_filled_starts_at_capacity() {
        let rb = RingBuffer::filled(4, 500);
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.snapshot(), vec![500, 500, 500, 500]);
    }

    #[test]
    fn test_snapshot_ordered_oldest_first() {
        let mut rb = RingBuffer::filled(3, 0);
        rb.push(10);
        rb.push(20);
        assert_eq!(rb.snapshot(), vec![0, 10, 20]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut rb = RingBuffer::new(2);
        rb.push(1.5f64);
        rb.push(2.5f64);

        let json = serde_json::to_string(&rb).unwrap();
        let parsed: RingBuffer<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.snapshot(), vec![1.5, 2.5]);
        assert_eq!(parsed.capacity(), 2);
    }
}
