// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded sample queue with drop-oldest overflow

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sample::GazeSample;

/// Lock-free bounded queue between the reader thread and the main loop.
///
/// When full, the oldest sample is evicted so the newest is always retained.
pub struct SampleQueue {
    queue: ArrayQueue<GazeSample>,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, sample: GazeSample) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        if self.queue.force_push(sample).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop up to `max` samples in arrival order without blocking
    pub fn drain(&self, max: usize) -> Vec<GazeSample> {
        let mut out = Vec::with_capacity(max.min(self.queue.len()));
        while out.len() < max {
            match self.queue.pop() {
                Some(sample) => out.push(sample),
                None => break,
            }
        }
        out
    }

    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_attributes;

    fn sample_at(t: f64) -> GazeSample {
        GazeSample::from_record_at(&parse_attributes(r#"<REC BPOGX="0.5" BPOGY="0.5" BPOGV="1" />"#), t)
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = SampleQueue::new(1024);
        for i in 0..1024 {
            queue.push(sample_at(i as f64));
        }
        assert_eq!(queue.len(), 1024);

        queue.push(sample_at(1024.0));
        assert_eq!(queue.len(), 1024);
        assert_eq!(queue.dropped_count(), 1);

        let all = queue.drain(usize::MAX);
        assert_eq!(all.first().map(|s| s.t), Some(1.0));
        assert_eq!(all.last().map(|s| s.t), Some(1024.0));
    }

    #[test]
    fn test_drain_respects_max() {
        let queue = SampleQueue::new(8);
        for i in 0..5 {
            queue.push(sample_at(i as f64));
        }
        assert_eq!(queue.drain(3).len(), 3);
        assert_eq!(queue.len(), 2);
    }
}
