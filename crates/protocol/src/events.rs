//! Events emitted by the process manager.
//!
//! The manager reports what happened to each process through these events;
//! consumers (metrics exporters, dashboards, log shippers) decide how to
//! aggregate or present them.
//!
//! Uses tagged enum serialization:
//! ```json
//! {
//!   "type": "processStateChanged",
//!   "payload": {
//!     "process_id": "db-conn-1",
//!     "from": "SYNCING",
//!     "to": "TERMINATING"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::process_models::{ProcessId, ProcessState, SyncPhase, UpdateKind};

/// Why a process was put back on the retry queue.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RetryReason {
    /// State changed or a newer update is waiting; run again immediately.
    PhaseTransition,
    /// Sync succeeded; periodic resync.
    Resync,
    /// Caller-classified transient failure.
    Transient,
    /// Persistent failure; `attempt` consecutive failures so far.
    Backoff { attempt: u32 },
}

/// Events sent from the process manager to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A process moved to a later lifecycle state.
    ProcessStateChanged {
        process_id: ProcessId,
        from: ProcessState,
        to: ProcessState,
    },

    /// A syncer call returned (or panicked).
    ProcessSynced {
        process_id: ProcessId,
        phase: SyncPhase,
        update_kind: UpdateKind,
        #[ts(type = "number")]
        duration_ms: u64,
        error: Option<String>,
    },

    /// The process was scheduled for another worker turn.
    ProcessRetryScheduled {
        process_id: ProcessId,
        reason: RetryReason,
        #[ts(type = "number")]
        delay_ms: u64,
    },

    /// The syncer reported progress while stopping the process.
    ProcessTerminationProgress {
        process_id: ProcessId,
        message: String,
    },

    /// A finished process was created again under the same id.
    ProcessRestarted {
        process_id: ProcessId,
        restart_count: u32,
    },

    /// A finished orphan was removed by reconciliation.
    ProcessPurged { process_id: ProcessId },
}

impl Event {
    /// The process this event concerns.
    pub fn process_id(&self) -> &ProcessId {
        match self {
            Event::ProcessStateChanged { process_id, .. }
            | Event::ProcessSynced { process_id, .. }
            | Event::ProcessRetryScheduled { process_id, .. }
            | Event::ProcessTerminationProgress { process_id, .. }
            | Event::ProcessRestarted { process_id, .. }
            | Event::ProcessPurged { process_id } => process_id,
        }
    }
}
