//! Aggregated health of every process tracked by a manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::process_models::{ProcessId, ProcessState, ProcessStatus};

/// Manager-wide health snapshot.
///
/// Intended for a health-check endpoint or metrics exporter; the counts are
/// derived from the per-process entries taken under the same lock.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,

    pub total_processes: usize,

    /// Processes in `Syncing`.
    pub running_processes: usize,

    /// Processes in `Terminating` or `Terminated`.
    pub terminating_processes: usize,

    /// Processes whose error count reached the unhealthy threshold.
    pub failed_processes: usize,

    /// Processes waiting in the retry queue.
    pub work_queue_depth: usize,

    pub processes: BTreeMap<ProcessId, ProcessStatus>,
}

impl HealthSnapshot {
    /// Number of processes currently in `state`.
    pub fn count_in(&self, state: ProcessState) -> usize {
        self.processes.values().filter(|p| p.state == state).count()
    }

    /// True when no tracked process is failing.
    pub fn is_healthy(&self) -> bool {
        self.failed_processes == 0
    }
}
