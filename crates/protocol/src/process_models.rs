//! Process identity, lifecycle state and status snapshot models.
//!
//! These are the types a process manager reports outward: the identifier of a
//! managed unit, the strictly forward lifecycle it moves through, and the
//! point-in-time snapshot consumed by health checks and metrics exporters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

/// Longest accepted process identifier, in bytes.
pub const MAX_PROCESS_ID_LEN: usize = 253;

/// Reasons a string is rejected as a [`ProcessId`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidProcessId {
    #[error("process id is empty")]
    Empty,
    #[error("process id is {len} bytes long (max {MAX_PROCESS_ID_LEN})")]
    TooLong { len: usize },
    #[error("process id {id:?} contains invalid character {ch:?}")]
    InvalidChar { id: String, ch: char },
}

/// Opaque, stable identifier of a managed process.
///
/// Valid identifiers are 1 to [`MAX_PROCESS_ID_LEN`] bytes of ASCII
/// alphanumerics or `-`, `_`, `.`, `:`, `/`. The same identifier may be
/// reused once the previous unit has been purged or restarted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, TS)]
pub struct ProcessId(String);

impl ProcessId {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidProcessId> {
        let id = id.into();
        Self::check(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Re-check the identifier format.
    ///
    /// Identifiers built through [`ProcessId::new`] or deserialization are
    /// always valid; this exists for callers holding ids from elsewhere.
    pub fn validate(&self) -> Result<(), InvalidProcessId> {
        Self::check(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn check(id: &str) -> Result<(), InvalidProcessId> {
        if id.is_empty() {
            return Err(InvalidProcessId::Empty);
        }
        if id.len() > MAX_PROCESS_ID_LEN {
            return Err(InvalidProcessId::TooLong { len: id.len() });
        }
        if let Some(ch) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/')))
        {
            return Err(InvalidProcessId::InvalidChar {
                id: id.to_string(),
                ch,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProcessId {
    type Err = InvalidProcessId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ProcessId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ProcessId::new(s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ProcessId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// Lifecycle state of a managed process.
///
/// States only ever move forward:
/// Starting -> Syncing -> Terminating -> Terminated -> Finished
///
/// A process may skip `Syncing` (terminated before its first successful
/// sync), but never returns to an earlier state. The derived `Ord` follows
/// lifecycle order.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    /// Created, first sync not yet successful.
    Starting,

    /// Running and synced at least once.
    Syncing,

    /// Termination requested; resources are being told to stop.
    Terminating,

    /// Stopped, awaiting resource cleanup.
    Terminated,

    /// Cleanup complete; eligible for purge.
    Finished,
}

impl ProcessState {
    /// True for `Terminating` and every later state.
    pub fn is_terminating(self) -> bool {
        self >= ProcessState::Terminating
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Starting => "Starting",
            ProcessState::Syncing => "Syncing",
            ProcessState::Terminating => "Terminating",
            ProcessState::Terminated => "Terminated",
            ProcessState::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Kind of intent carried by a process update.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    Create,
    Update,
    /// Periodic resync; also used internally to drive phase transitions.
    Sync,
    Terminate,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateKind::Create => "Create",
            UpdateKind::Update => "Update",
            UpdateKind::Sync => "Sync",
            UpdateKind::Terminate => "Terminate",
        };
        f.write_str(name)
    }
}

/// Which syncer operation a worker invoked.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    /// Start or update (`sync_process`).
    Sync,
    /// Stop within the grace period (`sync_terminating_process`).
    Terminating,
    /// Release resources (`sync_terminated_process`).
    Terminated,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Sync => "Sync",
            SyncPhase::Terminating => "Terminating",
            SyncPhase::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Point-in-time status of one managed process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ProcessStatus {
    pub id: ProcessId,

    pub state: ProcessState,

    /// `Syncing` with fewer errors than the unhealthy threshold.
    pub healthy: bool,

    /// A worker currently holds this process's turn.
    pub working: bool,

    /// Kind of the latest update not yet picked up by the worker.
    pub pending: Option<UpdateKind>,

    /// Kind of the update the worker is processing right now.
    pub active: Option<UpdateKind>,

    pub created_at: DateTime<Utc>,

    /// First successful sync.
    pub started_at: Option<DateTime<Utc>>,

    /// Most recent successful sync.
    pub last_sync: Option<DateTime<Utc>>,

    pub terminating_at: Option<DateTime<Utc>>,

    pub terminated_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Time since `started_at`, frozen once the process terminated.
    #[ts(type = "number")]
    pub uptime_ms: u64,

    /// Effective grace period once termination has been requested.
    #[ts(type = "number | null")]
    pub grace_period_secs: Option<u64>,

    pub evicted: bool,

    /// Absent from the desired set at the last reconciliation.
    pub orphaned: bool,

    /// Persistent errors since the last successful sync.
    pub error_count: u32,

    pub last_error: Option<String>,

    pub restart_count: u32,

    /// Latest progress message reported while terminating.
    pub termination_progress: Option<String>,
}
