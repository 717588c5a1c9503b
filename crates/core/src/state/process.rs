//! Per-process record and its state machine.
//!
//! A [`ProcessRecord`] is the single row the manager keeps for each process.
//! All transition rules live here as plain synchronous methods; callers hold
//! the table lock around them and do any I/O (syncer calls, events,
//! callbacks) after releasing it.
//!
//! The lifecycle state is never stored. It is derived from the transition
//! timestamps with precedence
//! `finished > terminated > terminating > synced > starting`, so once a
//! later timestamp is set the state cannot move backwards.

use crate::syncer::{SyncError, SyncOutcome};
use chrono::{DateTime, Utc};
use pv_protocol::{ProcessId, ProcessState, ProcessStatus, RetryReason, SyncPhase, UpdateKind};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Callback invoked with a fresh snapshot on every termination progress report.
pub type StatusFn = Arc<dyn Fn(&ProcessStatus) + Send + Sync>;

/// An update waiting for the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate<C> {
    pub kind: UpdateKind,
    /// New desired config; `None` keeps the last applied one.
    pub config: Option<C>,
}

/// The update a worker is processing right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveUpdate {
    pub kind: UpdateKind,
    pub phase: SyncPhase,
    pub started_at: DateTime<Utc>,
}

/// Everything a worker needs to run one syncer call without the lock.
#[derive(Debug, Clone)]
pub struct Turn<C> {
    pub phase: SyncPhase,
    pub kind: UpdateKind,
    pub config: C,
    pub token: CancellationToken,
    /// Effective grace period, for the `Terminating` phase.
    pub grace_period: Option<Duration>,
    state_at_start: ProcessState,
    grace_at_start: Option<u64>,
}

/// Outcome of [`ProcessRecord::begin_termination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminationChange {
    /// This call moved the process into `Terminating`.
    pub began: bool,
    /// This call lowered the grace period.
    pub grace_shortened: bool,
}

impl TerminationChange {
    pub fn changed(&self) -> bool {
        self.began || self.grace_shortened
    }
}

/// What a finished turn changed, for the worker to act on after unlocking.
#[derive(Debug)]
pub struct TurnReport {
    /// State just before the result was applied.
    pub from: ProcessState,
    pub to: ProcessState,
    /// Why the process should run again; `None` once it is finished.
    pub retry: Option<RetryReason>,
    /// Error text when the call failed.
    pub error: Option<String>,
    /// The call was overtaken by termination or a shorter grace period.
    pub superseded: bool,
    /// Completion senders to fire now that the process is terminated.
    pub terminated_waiters: Vec<oneshot::Sender<()>>,
}

/// Internal per-process row.
pub struct ProcessRecord<C> {
    id: ProcessId,
    working: bool,
    pending: Option<PendingUpdate<C>>,
    active: Option<ActiveUpdate>,
    last_config: C,

    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    synced_at: Option<DateTime<Utc>>,
    terminating_at: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,

    grace_period_secs: Option<u64>,
    evicted: bool,
    orphaned: bool,
    cancel: CancellationToken,

    error_count: u32,
    last_error: Option<SyncError>,
    restart_count: u32,

    termination_waiters: Vec<oneshot::Sender<()>>,
    status_fn: Option<StatusFn>,
    termination_progress: Option<String>,
}

impl<C: Clone> ProcessRecord<C> {
    /// A fresh `Starting` record with `kind` pending.
    pub fn new(
        id: ProcessId,
        kind: UpdateKind,
        config: C,
        cancel: CancellationToken,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            working: false,
            pending: Some(PendingUpdate { kind, config: None }),
            active: None,
            last_config: config,
            created_at: now,
            started_at: None,
            synced_at: None,
            terminating_at: None,
            terminated_at: None,
            finished_at: None,
            grace_period_secs: None,
            evicted: false,
            orphaned: false,
            cancel,
            error_count: 0,
            last_error: None,
            restart_count: 0,
            termination_waiters: Vec::new(),
            status_fn: None,
            termination_progress: None,
        }
    }

    /// A replacement record for a finished process created again.
    pub fn restarted(
        previous: &ProcessRecord<C>,
        config: C,
        cancel: CancellationToken,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::new(previous.id.clone(), UpdateKind::Create, config, cancel, now);
        record.restart_count = previous.restart_count.saturating_add(1);
        record
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    pub fn state(&self) -> ProcessState {
        if self.finished_at.is_some() {
            ProcessState::Finished
        } else if self.terminated_at.is_some() {
            ProcessState::Terminated
        } else if self.terminating_at.is_some() {
            ProcessState::Terminating
        } else if self.synced_at.is_some() {
            ProcessState::Syncing
        } else {
            ProcessState::Starting
        }
    }

    pub fn is_working(&self) -> bool {
        self.working
    }

    pub fn pending(&self) -> Option<&PendingUpdate<C>> {
        self.pending.as_ref()
    }

    pub fn grace_period_secs(&self) -> Option<u64> {
        self.grace_period_secs
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    pub fn set_orphaned(&mut self, orphaned: bool) {
        self.orphaned = orphaned;
    }

    pub fn status_fn(&self) -> Option<StatusFn> {
        self.status_fn.clone()
    }

    /// `Syncing` with fewer than `threshold` consecutive failures.
    pub fn is_healthy(&self, threshold: u32) -> bool {
        self.state() == ProcessState::Syncing && self.error_count < threshold
    }

    /// Queue an update for the worker, coalescing with any pending one.
    ///
    /// The newest config wins. A pending `Create` stays a `Create` until the
    /// worker has run it, and a `Sync` never downgrades a pending
    /// `Create`/`Update`. Returns `false` (and changes nothing) for a
    /// non-terminate update once termination has begun.
    pub fn submit(&mut self, kind: UpdateKind, config: Option<C>) -> bool {
        if self.state().is_terminating() && kind != UpdateKind::Terminate {
            return false;
        }

        let merged = match self.pending.take() {
            None => PendingUpdate { kind, config },
            Some(existing) => {
                let kind = match (existing.kind, kind) {
                    (_, UpdateKind::Terminate) => UpdateKind::Terminate,
                    (UpdateKind::Terminate, _) => UpdateKind::Terminate,
                    (UpdateKind::Create, _) => UpdateKind::Create,
                    (UpdateKind::Update, UpdateKind::Sync) => UpdateKind::Update,
                    (_, newer) => newer,
                };
                PendingUpdate {
                    kind,
                    config: config.or(existing.config),
                }
            }
        };
        self.pending = Some(merged);
        true
    }

    /// Re-arm a resync when nothing else is pending.
    ///
    /// Returns whether the worker has something to do.
    pub fn arm_resync(&mut self) -> bool {
        if self.state() == ProcessState::Finished || self.working {
            return false;
        }
        if self.pending.is_none() {
            self.pending = Some(PendingUpdate {
                kind: UpdateKind::Sync,
                config: None,
            });
        }
        true
    }

    /// Request termination.
    ///
    /// The first request sets `terminating_at` and the grace period (`grace`
    /// or `default_grace`); later requests can only lower the grace period.
    /// Grace periods are at least one second. The current cancellation token
    /// is cancelled when termination begins or the grace period shrinks,
    /// unless the process already stopped.
    pub fn begin_termination(
        &mut self,
        grace: Option<u64>,
        evict: bool,
        default_grace: u64,
        now: DateTime<Utc>,
    ) -> TerminationChange {
        let mut change = TerminationChange::default();
        if self.state() >= ProcessState::Terminated {
            return change;
        }

        if self.terminating_at.is_none() {
            self.terminating_at = Some(now);
            change.began = true;
        }
        self.evicted |= evict;

        let requested = match (grace, self.grace_period_secs) {
            (Some(g), _) => Some(g.max(1)),
            (None, None) => Some(default_grace.max(1)),
            (None, Some(_)) => None,
        };
        if let Some(requested) = requested {
            match self.grace_period_secs {
                None => self.grace_period_secs = Some(requested),
                Some(current) if requested < current => {
                    self.grace_period_secs = Some(requested);
                    change.grace_shortened = !change.began;
                }
                Some(_) => {}
            }
        }

        if change.changed() {
            self.cancel.cancel();
        }
        change
    }

    /// Register termination callbacks.
    ///
    /// A completion sender fires immediately if the process already reached
    /// `Terminated`.
    pub fn register_termination(
        &mut self,
        completion: Option<oneshot::Sender<()>>,
        status_fn: Option<StatusFn>,
    ) {
        if let Some(completion) = completion {
            if self.state() >= ProcessState::Terminated {
                let _ = completion.send(());
            } else {
                self.termination_waiters.push(completion);
            }
        }
        if status_fn.is_some() {
            self.status_fn = status_fn;
        }
    }

    pub fn record_progress(&mut self, message: &str) {
        self.termination_progress = Some(message.to_string());
    }

    /// Claim the pending update and start a turn.
    ///
    /// Returns `None` when a turn is already running, nothing is pending, or
    /// the process is finished. A cancelled token is replaced with a fresh
    /// child of `root`.
    pub fn start_turn(&mut self, root: &CancellationToken, now: DateTime<Utc>) -> Option<Turn<C>> {
        let state = self.state();
        if self.working || state == ProcessState::Finished {
            return None;
        }
        let pending = self.pending.take()?;
        let phase = phase_for(state);
        // Stop and cleanup calls must see the config that was last synced.
        if let (SyncPhase::Sync, Some(config)) = (phase, pending.config) {
            self.last_config = config;
        }

        if self.cancel.is_cancelled() {
            self.cancel = root.child_token();
        }

        self.working = true;
        self.active = Some(ActiveUpdate {
            kind: pending.kind,
            phase,
            started_at: now,
        });

        Some(Turn {
            phase,
            kind: pending.kind,
            config: self.last_config.clone(),
            token: self.cancel.clone(),
            grace_period: match phase {
                SyncPhase::Terminating => self.grace_period_secs.map(Duration::from_secs),
                _ => None,
            },
            state_at_start: state,
            grace_at_start: self.grace_period_secs,
        })
    }

    /// Apply the result of a turn's syncer call.
    ///
    /// `Sync`-phase results for `Ok(Running)` mark the process synced;
    /// `Ok(Terminal)` and `Err(Terminal)` begin termination. A successful
    /// `Terminating` call marks it terminated, a successful `Terminated` call
    /// finished. Persistent, terminal and panicked errors count towards
    /// `error_count` unless the call was superseded. A failed update that
    /// left the state unchanged is re-armed so it runs again with the same
    /// kind, unless a newer one is already pending.
    pub fn finish_turn(
        &mut self,
        turn: &Turn<C>,
        result: Result<SyncOutcome, SyncError>,
        default_grace: u64,
        now: DateTime<Utc>,
    ) -> TurnReport {
        self.working = false;
        self.active = None;
        let before = self.state();

        let superseded = match turn.phase {
            SyncPhase::Sync => self.terminating_at.is_some(),
            SyncPhase::Terminating => self.grace_period_secs < turn.grace_at_start,
            SyncPhase::Terminated => false,
        };
        let fresh_pending = self.pending.is_some();
        let mut error = None;

        match result {
            Ok(outcome) => {
                self.error_count = 0;
                self.last_error = None;
                match turn.phase {
                    SyncPhase::Sync => match outcome {
                        SyncOutcome::Running => {
                            self.synced_at = Some(now);
                            self.started_at.get_or_insert(now);
                        }
                        SyncOutcome::Terminal => {
                            self.begin_termination(None, false, default_grace, now);
                        }
                    },
                    SyncPhase::Terminating => self.terminated_at = Some(now),
                    SyncPhase::Terminated => self.finished_at = Some(now),
                }
            }
            Err(err) => {
                error = Some(err.to_string());
                if !superseded {
                    if err.counts_as_failure() {
                        self.error_count = self.error_count.saturating_add(1);
                    }
                    if turn.phase == SyncPhase::Sync && matches!(err, SyncError::Terminal(_)) {
                        self.begin_termination(None, false, default_grace, now);
                    }
                }
                if !superseded && self.pending.is_none() && self.state() == turn.state_at_start {
                    self.pending = Some(PendingUpdate {
                        kind: turn.kind,
                        config: None,
                    });
                }
                self.last_error = Some(err);
            }
        }

        let to = self.state();
        let terminated_waiters = if to >= ProcessState::Terminated {
            std::mem::take(&mut self.termination_waiters)
        } else {
            Vec::new()
        };

        let retry = if to == ProcessState::Finished {
            None
        } else if phase_for(to) != turn.phase || superseded || fresh_pending {
            Some(RetryReason::PhaseTransition)
        } else {
            match &self.last_error {
                None => Some(RetryReason::Resync),
                Some(SyncError::Transient(_)) | Some(SyncError::Cancelled) => {
                    Some(RetryReason::Transient)
                }
                Some(_) => Some(RetryReason::Backoff {
                    attempt: self.error_count.max(1),
                }),
            }
        };

        TurnReport {
            from: before,
            to,
            retry,
            error,
            superseded,
            terminated_waiters,
        }
    }

    /// Public snapshot of this record.
    pub fn snapshot(&self, unhealthy_threshold: u32, now: DateTime<Utc>) -> ProcessStatus {
        let uptime_ms = self
            .started_at
            .map(|started| {
                let end = self.terminated_at.unwrap_or(now);
                (end - started).num_milliseconds().max(0) as u64
            })
            .unwrap_or(0);

        ProcessStatus {
            id: self.id.clone(),
            state: self.state(),
            healthy: self.is_healthy(unhealthy_threshold),
            working: self.working,
            pending: self.pending.as_ref().map(|p| p.kind),
            active: self.active.map(|a| a.kind),
            created_at: self.created_at,
            started_at: self.started_at,
            last_sync: self.synced_at,
            terminating_at: self.terminating_at,
            terminated_at: self.terminated_at,
            finished_at: self.finished_at,
            uptime_ms,
            grace_period_secs: self.grace_period_secs,
            evicted: self.evicted,
            orphaned: self.orphaned,
            error_count: self.error_count,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            restart_count: self.restart_count,
            termination_progress: self.termination_progress.clone(),
        }
    }
}

impl<C> fmt::Debug for ProcessRecord<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("id", &self.id)
            .field("working", &self.working)
            .field("terminating_at", &self.terminating_at)
            .field("terminated_at", &self.terminated_at)
            .field("finished_at", &self.finished_at)
            .field("grace_period_secs", &self.grace_period_secs)
            .field("error_count", &self.error_count)
            .field("restart_count", &self.restart_count)
            .finish_non_exhaustive()
    }
}

/// Syncer operation a worker runs for a process in `state`.
fn phase_for(state: ProcessState) -> SyncPhase {
    match state {
        ProcessState::Starting | ProcessState::Syncing => SyncPhase::Sync,
        ProcessState::Terminating => SyncPhase::Terminating,
        ProcessState::Terminated | ProcessState::Finished => SyncPhase::Terminated,
    }
}
