//! Bounded drop-oldest queue between a poller and its writer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Default number of items a device queue holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// One encoded response waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Encoded bytes, never empty when produced by the encoder.
    pub payload: Vec<u8>,
    /// Byte offset relative to the device start address.
    pub offset: u32,
}

impl QueueItem {
    pub fn new(payload: Vec<u8>, offset: u32) -> Self {
        Self { payload, offset }
    }
}

/// FIFO with a hard capacity; when full, the oldest item is evicted.
///
/// Enqueue never blocks and never fails, so a slow controller can never
/// stall instrument polling.
#[derive(Debug)]
pub struct BoundedRelayQueue {
    items: Mutex<VecDeque<QueueItem>>,
    capacity: usize,
}

impl BoundedRelayQueue {
    /// Create a queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            capacity,
        }
    }

    /// Append `item`, evicting from the head until the capacity holds.
    ///
    /// Returns how many items were evicted.
    pub fn enqueue(&self, item: QueueItem) -> usize {
        let mut items = self.lock();
        items.push_back(item);

        let mut dropped = 0;
        while items.len() > self.capacity {
            items.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Remove and return the head item, if any.
    pub fn try_dequeue(&self) -> Option<QueueItem> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panicking holder cannot leave the deque half-mutated, so the data is
    // still consistent after poisoning.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BoundedRelayQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
