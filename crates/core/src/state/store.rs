//! The process status store.
//!
//! One `parking_lot::Mutex` guards every row. Callers keep critical sections
//! short and never hold the guard across an `.await`.

use crate::state::process::ProcessRecord;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use pv_protocol::{ProcessId, ProcessState, ProcessStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// A row plus the handle of the worker that owns it.
#[derive(Debug)]
pub struct ProcessEntry<C> {
    pub record: ProcessRecord<C>,
    /// Capacity-1 wake channel of this generation's worker.
    pub wake: mpsc::Sender<()>,
    /// Bumped whenever a row is replaced, so stale workers can tell.
    pub generation: u64,
}

impl<C> ProcessEntry<C> {
    /// Nudge the worker; a wake already queued is enough.
    pub fn wake(&self) {
        let _ = self.wake.try_send(());
    }
}

pub type Rows<C> = HashMap<ProcessId, ProcessEntry<C>>;

/// All process rows, keyed by id.
pub struct ProcessTable<C> {
    rows: Mutex<Rows<C>>,
    generations: AtomicU64,
}

impl<C: Clone> Default for ProcessTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone> ProcessTable<C> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Rows<C>> {
        self.rows.lock()
    }

    /// A generation number no row has used yet.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state_of(&self, id: &ProcessId) -> Option<ProcessState> {
        self.rows.lock().get(id).map(|entry| entry.record.state())
    }

    pub fn status_of(&self, id: &ProcessId, unhealthy_threshold: u32) -> Option<ProcessStatus> {
        self.rows
            .lock()
            .get(id)
            .map(|entry| entry.record.snapshot(unhealthy_threshold, Utc::now()))
    }

    /// Snapshots of every row, ordered by id.
    pub fn statuses(&self, unhealthy_threshold: u32) -> BTreeMap<ProcessId, ProcessStatus> {
        let now = Utc::now();
        snapshot_rows(&self.rows.lock(), unhealthy_threshold, now)
    }
}

/// Snapshot every row of an already locked table.
pub fn snapshot_rows<C: Clone>(
    rows: &Rows<C>,
    unhealthy_threshold: u32,
    now: chrono::DateTime<Utc>,
) -> BTreeMap<ProcessId, ProcessStatus> {
    rows.iter()
        .map(|(id, entry)| (id.clone(), entry.record.snapshot(unhealthy_threshold, now)))
        .collect()
}
