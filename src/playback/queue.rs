//! Bounded FIFO of decoded buffers with a minimum-fill gate
//!
//! Absorbs startup and reconnect jitter between the decoder and the sink.
//! Capacity is fixed; when full, the oldest buffer is evicted to make room
//! (drop-oldest), which keeps a live stream near-live instead of drifting
//! behind. Every mutation returns a [`QueueSnapshot`] computed inside the
//! same critical section, so callers that need "count after my push" and
//! "is the playback gate satisfied" never take a second lock.
//!
//! ## Thread Safety
//!
//! All operations take one short internal lock and never touch I/O while
//! holding it. Safe for a decoder-side producer and an orchestrator-side
//! consumer on independent contexts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use crate::audio::types::PcmBuffer;

/// Queue occupancy observed atomically with a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Buffers currently queued
    pub count: usize,
    /// True when `count` has reached the minimum-fill gate
    pub has_minimum: bool,
}

/// Fixed-capacity FIFO of decoded PCM buffers, drop-oldest on overflow
pub struct BufferQueue {
    inner: Mutex<VecDeque<Arc<PcmBuffer>>>,
    capacity: usize,
    minimum: usize,
    /// Buffers evicted by drop-oldest since construction
    dropped: AtomicU64,
}

impl BufferQueue {
    /// Create a queue
    ///
    /// `minimum` is clamped to `capacity`: a gate that could never trip is
    /// a misconfiguration, not a reason to wedge playback forever.
    pub fn new(capacity: usize, minimum: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            minimum: minimum.min(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a buffer, evicting the oldest first when at capacity
    ///
    /// Returns the post-mutation snapshot from the same critical section.
    pub fn push(&self, buffer: Arc<PcmBuffer>) -> QueueSnapshot {
        let mut q = self.inner.lock().unwrap();
        if q.len() == self.capacity {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(buffer);
        self.snapshot_locked(&q)
    }

    /// Remove and return the oldest buffer
    pub fn pop(&self) -> Option<Arc<PcmBuffer>> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Empty the queue atomically, returning its contents oldest-first
    pub fn drain_all(&self) -> Vec<Arc<PcmBuffer>> {
        let mut q = self.inner.lock().unwrap();
        q.drain(..).collect()
    }

    /// Discard all queued buffers
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Current occupancy without mutating
    pub fn snapshot(&self) -> QueueSnapshot {
        let q = self.inner.lock().unwrap();
        self.snapshot_locked(&q)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Minimum-fill gate threshold (post-clamping)
    pub fn minimum(&self) -> usize {
        self.minimum
    }

    /// Buffers lost to drop-oldest eviction since construction
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn snapshot_locked(&self, q: &VecDeque<Arc<PcmBuffer>>) -> QueueSnapshot {
        QueueSnapshot {
            count: q.len(),
            has_minimum: q.len() >= self.minimum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::OUTPUT_SAMPLE_RATE;

    /// Buffer whose first sample tags its identity
    fn tagged(tag: f32) -> Arc<PcmBuffer> {
        Arc::new(PcmBuffer::new(
            vec![tag; 4],
            vec![tag; 4],
            OUTPUT_SAMPLE_RATE,
        ))
    }

    #[test]
    fn test_snapshot_tracks_count() {
        let queue = BufferQueue::new(8, 3);
        assert_eq!(queue.snapshot(), QueueSnapshot { count: 0, has_minimum: false });

        let snap = queue.push(tagged(1.0));
        assert_eq!(snap.count, 1);
        assert!(!snap.has_minimum);
    }

    #[test]
    fn test_gate_trips_exactly_at_minimum() {
        let queue = BufferQueue::new(8, 3);
        assert!(!queue.push(tagged(1.0)).has_minimum);
        assert!(!queue.push(tagged(2.0)).has_minimum);

        let snap = queue.push(tagged(3.0));
        assert!(snap.has_minimum);
        assert_eq!(snap.count, 3);

        // Stays true at or above the threshold
        assert!(queue.push(tagged(4.0)).has_minimum);
        queue.pop();
        assert!(queue.snapshot().has_minimum);
        queue.pop();
        assert!(!queue.snapshot().has_minimum);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = BufferQueue::new(3, 1);
        for i in 0..7 {
            let snap = queue.push(tagged(i as f32));
            assert!(snap.count <= 3);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped_count(), 4);

        // The three most recent remain, oldest-first
        let drained = queue.drain_all();
        let tags: Vec<f32> = drained.iter().map(|b| b.left[0]).collect();
        assert_eq!(tags, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BufferQueue::new(4, 1);
        queue.push(tagged(10.0));
        queue.push(tagged(20.0));
        queue.push(tagged(30.0));

        assert_eq!(queue.pop().unwrap().left[0], 10.0);
        assert_eq!(queue.pop().unwrap().left[0], 20.0);
        assert_eq!(queue.pop().unwrap().left[0], 30.0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drain_all_empties_atomically() {
        let queue = BufferQueue::new(4, 2);
        queue.push(tagged(1.0));
        queue.push(tagged(2.0));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = BufferQueue::new(4, 2);
        queue.push(tagged(1.0));
        queue.push(tagged(2.0));
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.snapshot().has_minimum);
    }

    #[test]
    fn test_minimum_clamped_to_capacity() {
        let queue = BufferQueue::new(2, 10);
        assert_eq!(queue.minimum(), 2);
        queue.push(tagged(1.0));
        let snap = queue.push(tagged(2.0));
        // Gate must be reachable despite the misconfiguration
        assert!(snap.has_minimum);
    }

    #[test]
    fn test_cross_thread_producer_consumer() {
        let queue = Arc::new(BufferQueue::new(64, 4));
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..500 {
                    queue.push(tagged(i as f32));
                }
            })
        };
        let mut popped = 0;
        while popped < 100 {
            if queue.pop().is_some() {
                popped += 1;
            }
        }
        producer.join().unwrap();
        assert!(queue.len() <= 64);
    }
}
