//! Delay-ordered queue of process ids.
//!
//! Each process id appears at most once. Re-enqueueing an id that is already
//! waiting keeps whichever ready time comes first; superseded heap entries
//! stay in the heap and are skipped when they surface.

use parking_lot::Mutex;
use pv_protocol::ProcessId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct WorkItem {
    ready_at: Instant,
    seq: u64,
    id: ProcessId,
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<Reverse<WorkItem>>,
    scheduled: HashMap<ProcessId, Instant>,
    seq: u64,
}

impl QueueInner {
    /// Drop heap entries whose id was removed or rescheduled earlier.
    fn prune(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.scheduled.get(&top.id) == Some(&top.ready_at) {
                return;
            }
            self.heap.pop();
        }
    }

    fn pop_ready(&mut self, now: Instant) -> Option<ProcessId> {
        self.prune();
        match self.heap.peek() {
            Some(Reverse(top)) if top.ready_at <= now => {}
            _ => return None,
        }
        let Reverse(item) = self.heap.pop()?;
        self.scheduled.remove(&item.id);
        Some(item.id)
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        self.prune();
        self.heap.peek().map(|Reverse(top)| top.ready_at)
    }
}

/// Min-heap of process ids keyed by the instant they become ready.
#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` to become ready after `delay`.
    ///
    /// If `id` is already scheduled at or before the new ready time, this is
    /// a no-op.
    pub fn enqueue(&self, id: ProcessId, delay: Duration) {
        let ready_at = Instant::now() + delay;
        {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.scheduled.get(&id) {
                if *existing <= ready_at {
                    return;
                }
            }
            inner.seq += 1;
            let seq = inner.seq;
            inner.scheduled.insert(id.clone(), ready_at);
            inner.heap.push(Reverse(WorkItem { ready_at, seq, id }));
        }
        self.notify.notify_one();
    }

    /// Pop the earliest id whose ready time has passed, without waiting.
    pub fn try_dequeue(&self) -> Option<ProcessId> {
        self.inner.lock().pop_ready(Instant::now())
    }

    /// Wait for the next ready id.
    ///
    /// Intended for a single consumer; cancel-safe.
    pub async fn dequeue(&self) -> ProcessId {
        loop {
            let deadline = {
                let mut inner = self.inner.lock();
                if let Some(id) = inner.pop_ready(Instant::now()) {
                    return id;
                }
                inner.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Forget `id` if it is scheduled.
    pub fn remove(&self, id: &ProcessId) -> bool {
        self.inner.lock().scheduled.remove(id).is_some()
    }

    /// Ready time of `id`, if scheduled.
    pub fn scheduled_at(&self, id: &ProcessId) -> Option<Instant> {
        self.inner.lock().scheduled.get(id).copied()
    }

    /// Number of distinct ids waiting, ready or not.
    pub fn len(&self) -> usize {
        self.inner.lock().scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
