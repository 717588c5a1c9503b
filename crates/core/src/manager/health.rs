//! Health aggregation over the process table.

use crate::state::store::{snapshot_rows, Rows};
use chrono::{DateTime, Utc};
use pv_protocol::{HealthSnapshot, ProcessState};

/// Summarise every row of a locked table.
///
/// - running: `Syncing`
/// - terminating: `Terminating` or `Terminated`
/// - failed: at or above the unhealthy error threshold, in any state
pub fn health_snapshot<C: Clone>(
    rows: &Rows<C>,
    unhealthy_threshold: u32,
    work_queue_depth: usize,
    now: DateTime<Utc>,
) -> HealthSnapshot {
    let processes = snapshot_rows(rows, unhealthy_threshold, now);

    let mut running = 0;
    let mut terminating = 0;
    let mut failed = 0;
    for status in processes.values() {
        match status.state {
            ProcessState::Syncing => running += 1,
            ProcessState::Terminating | ProcessState::Terminated => terminating += 1,
            _ => {}
        }
        if status.error_count >= unhealthy_threshold {
            failed += 1;
        }
    }

    HealthSnapshot {
        taken_at: now,
        total_processes: processes.len(),
        running_processes: running,
        terminating_processes: terminating,
        failed_processes: failed,
        work_queue_depth,
        processes,
    }
}
