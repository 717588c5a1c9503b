//! Syncer trait and supporting types.
//!
//! A [`Syncer`] is the caller-supplied bridge between the manager's state
//! machine and whatever a process actually is (a connection, a plugin, a
//! child process). The manager decides *when* to call it; the syncer decides
//! *what* starting, stopping and cleaning up mean.

pub mod mock;

use async_trait::async_trait;
use pv_protocol::{ProcessId, UpdateKind};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Result of a successful `sync_process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The process is running as configured.
    Running,
    /// The process reached a terminal condition and should be terminated.
    Terminal,
}

/// Failure classification returned by a syncer.
///
/// The classification picks the retry delay: `Transient` and `Cancelled`
/// retry at the short interval, `Persistent` and `Panicked` back off
/// exponentially and count towards the unhealthy threshold, `Terminal`
/// starts termination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("persistent failure: {0}")]
    Persistent(String),

    #[error("terminal failure: {0}")]
    Terminal(String),

    #[error("sync cancelled")]
    Cancelled,

    /// Produced by the manager when a syncer call panics.
    #[error("syncer panicked: {0}")]
    Panicked(String),
}

impl SyncError {
    /// Whether this error counts towards `error_count`.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Persistent(_) | SyncError::Terminal(_) | SyncError::Panicked(_)
        )
    }
}

/// Per-call context handed to every syncer operation.
#[derive(Debug, Clone)]
pub struct SyncContext {
    process_id: ProcessId,
    token: CancellationToken,
}

impl SyncContext {
    pub fn new(process_id: ProcessId, token: CancellationToken) -> Self {
        Self { process_id, token }
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    /// True once the call has been superseded (termination began, the grace
    /// period shrank, or the manager is shutting down).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the call is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Channel for progress messages while a process is terminating.
#[derive(Clone)]
pub struct StatusReporter {
    report_fn: Arc<dyn Fn(&str) + Send + Sync>,
}

impl StatusReporter {
    pub fn new(report_fn: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            report_fn: Arc::new(report_fn),
        }
    }

    /// A reporter that discards every message.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, message: &str) {
        (self.report_fn)(message)
    }
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}

/// Caller-supplied lifecycle operations for one kind of process.
///
/// Implementations must be safe to call concurrently for *different*
/// process ids; the manager never runs two calls for the same id at once.
/// Every operation should return promptly once `ctx` is cancelled.
#[async_trait]
pub trait Syncer: Send + Sync + 'static {
    /// Configuration a process is created or updated with.
    type Config: Clone + Send + Sync + 'static;

    /// Start or reconcile a running process.
    async fn sync_process(
        &self,
        ctx: &SyncContext,
        kind: UpdateKind,
        config: &Self::Config,
    ) -> Result<SyncOutcome, SyncError>;

    /// Stop a process within `grace_period`.
    async fn sync_terminating_process(
        &self,
        ctx: &SyncContext,
        config: &Self::Config,
        grace_period: Duration,
        status: &StatusReporter,
    ) -> Result<(), SyncError>;

    /// Release whatever a stopped process still holds.
    async fn sync_terminated_process(
        &self,
        ctx: &SyncContext,
        config: &Self::Config,
    ) -> Result<(), SyncError>;
}

#[async_trait]
impl<S: Syncer> Syncer for Arc<S> {
    type Config = S::Config;

    async fn sync_process(
        &self,
        ctx: &SyncContext,
        kind: UpdateKind,
        config: &Self::Config,
    ) -> Result<SyncOutcome, SyncError> {
        (**self).sync_process(ctx, kind, config).await
    }

    async fn sync_terminating_process(
        &self,
        ctx: &SyncContext,
        config: &Self::Config,
        grace_period: Duration,
        status: &StatusReporter,
    ) -> Result<(), SyncError> {
        (**self)
            .sync_terminating_process(ctx, config, grace_period, status)
            .await
    }

    async fn sync_terminated_process(
        &self,
        ctx: &SyncContext,
        config: &Self::Config,
    ) -> Result<(), SyncError> {
        (**self).sync_terminated_process(ctx, config).await
    }
}
