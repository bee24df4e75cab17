//! Bounded priority queues ordered by `(priority, sequence)`.
//!
//! Lower priority values pop first. The sequence number is assigned at
//! enqueue time and breaks ties, so entries with equal priority come out in
//! arrival order. When full, the incoming entry is refused and everything
//! already queued stays untouched.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::Notify;

/// A queued item with its ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry<T> {
    pub priority: u32,
    pub sequence: u64,
    pub item: T,
}

impl<T> QueueEntry<T> {
    fn key(&self) -> (u32, u64) {
        (self.priority, self.sequence)
    }
}

/// Heap slot reversing the key so `BinaryHeap` (a max-heap) pops the smallest.
#[derive(Debug)]
struct Slot<T>(QueueEntry<T>);

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.key().cmp(&self.0.key())
    }
}

/// Unsynchronized bounded priority heap.
#[derive(Debug)]
pub struct PriorityHeap<T> {
    heap: BinaryHeap<Slot<T>>,
    capacity: usize,
}

impl<T> PriorityHeap<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
        }
    }

    /// Unbounded heap, for owners that bound their input elsewhere.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Insert an entry that already carries its sequence number.
    ///
    /// Returns the entry back when the heap is full.
    pub fn push(&mut self, entry: QueueEntry<T>) -> Result<(), QueueEntry<T>> {
        if self.heap.len() >= self.capacity {
            return Err(entry);
        }
        self.heap.push(Slot(entry));
        Ok(())
    }

    /// Insert ignoring capacity. Used when returning an entry that was
    /// already admitted once.
    pub fn requeue(&mut self, entry: QueueEntry<T>) {
        self.heap.push(Slot(entry));
    }

    pub fn pop(&mut self) -> Option<QueueEntry<T>> {
        self.heap.pop().map(|slot| slot.0)
    }

    pub fn peek(&self) -> Option<&QueueEntry<T>> {
        self.heap.peek().map(|slot| &slot.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `(priority, sequence)` keys in pop order.
    pub fn keys_in_order(&self) -> Vec<(u32, u64)> {
        let mut keys: Vec<_> = self.heap.iter().map(|slot| slot.0.key()).collect();
        keys.sort_unstable();
        keys
    }
}

/// Thread-safe bounded priority queue with an async wait for the next entry.
///
/// The lock is only held for O(log n) heap mutation, never across an await.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    inner: Mutex<PriorityHeap<T>>,
    next_sequence: AtomicU64,
    notify: Notify,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PriorityHeap::new(capacity)),
            next_sequence: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Reserve the next sequence number without enqueuing anything.
    pub fn reserve_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Enqueue `item`, assigning it the next sequence number.
    ///
    /// Returns the assigned sequence, or the item back when the queue is full.
    pub fn push(&self, priority: u32, item: T) -> Result<u64, T> {
        let mut heap = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if heap.len() >= heap.capacity() {
            return Err(item);
        }
        let sequence = self.reserve_sequence();
        let pushed = heap.push(QueueEntry {
            priority,
            sequence,
            item,
        });
        drop(heap);
        match pushed {
            Ok(()) => {
                self.notify.notify_one();
                Ok(sequence)
            }
            Err(entry) => Err(entry.item),
        }
    }

    /// Put back an entry at its original priority and sequence.
    pub fn requeue(&self, entry: QueueEntry<T>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .requeue(entry);
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<QueueEntry<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    /// Pop the next entry, waiting up to `timeout` for one to arrive.
    pub async fn pop_wait(&self, timeout: Duration) -> Option<QueueEntry<T>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.pop() {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .capacity()
    }

    /// `(priority, sequence)` keys in pop order.
    pub fn keys_in_order(&self) -> Vec<(u32, u64)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys_in_order()
    }
}
