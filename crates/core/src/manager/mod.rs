//! Process manager.
//!
//! The [`ProcessManager`] is the central orchestrator for every managed
//! process. It owns the status store, the retry queue and one worker task per
//! process, and it exposes the synchronous update API callers drive it with.
//!
//! Each process moves strictly forward through
//! `Starting -> Syncing -> Terminating -> Terminated -> Finished`; the
//! caller's [`Syncer`] performs the actual work for each phase.

mod dispatch;
pub mod health;
pub mod update;
mod worker;

pub use update::{ProcessUpdate, TerminateOptions};

use crate::config::models::ManagerConfig;
use crate::error::{ManagerError, ManagerResult, UnfinishedProcess, ValidationError};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::queue::{RetryPolicy, WorkQueue};
use crate::state::process::ProcessRecord;
use crate::state::store::{snapshot_rows, ProcessEntry, ProcessTable};
use crate::syncer::Syncer;
use chrono::Utc;
use pv_protocol::{Event, HealthSnapshot, ProcessId, ProcessState, ProcessStatus, UpdateKind};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by the manager handle, its workers and the dispatcher.
pub(crate) struct Shared<S: Syncer> {
    syncer: Arc<S>,
    config: ManagerConfig,
    retry: RetryPolicy,
    table: ProcessTable<S::Config>,
    queue: Arc<WorkQueue>,
    metrics: Arc<dyn MetricsSink>,
    /// Parent of every per-process token; cancelled on shutdown.
    root: CancellationToken,
    /// Signalled whenever a process reaches `Finished`.
    finished: Notify,
    shutting_down: AtomicBool,
    runtime: Handle,
}

impl<S: Syncer> Shared<S> {
    fn emit_all(&self, events: Vec<Event>) {
        for event in &events {
            self.metrics.emit(event);
        }
    }

    /// Spawn the worker for one generation of a process.
    fn spawn_worker(self: &Arc<Self>, id: ProcessId, generation: u64, wake: mpsc::Receiver<()>) {
        self.runtime.spawn(worker::run_worker(
            Arc::downgrade(self),
            id,
            generation,
            wake,
            self.root.clone(),
        ));
    }

    /// Start termination of a live row and queue the terminate for its worker.
    ///
    /// Returns the state-change event if termination began now.
    fn terminate_entry(
        &self,
        entry: &mut ProcessEntry<S::Config>,
        grace_period_secs: Option<u64>,
        evict: bool,
    ) -> Option<Event> {
        let from = entry.record.state();
        let change = entry.record.begin_termination(
            grace_period_secs,
            evict,
            self.config.default_grace_period_secs,
            Utc::now(),
        );
        entry.record.submit(UpdateKind::Terminate, None);
        entry.wake();

        change.began.then(|| Event::ProcessStateChanged {
            process_id: entry.record.id().clone(),
            from,
            to: ProcessState::Terminating,
        })
    }
}

impl<S: Syncer> Drop for Shared<S> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Concurrent lifecycle manager for processes driven by a [`Syncer`].
///
/// The handle is cheap to clone; all clones share the same processes.
/// Workers and the dispatcher stop once every handle is dropped.
pub struct ProcessManager<S: Syncer> {
    shared: Arc<Shared<S>>,
}

impl<S: Syncer> Clone for ProcessManager<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Syncer> ProcessManager<S> {
    /// Create a manager that discards metrics events.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(syncer: S, config: ManagerConfig) -> Self {
        Self::with_metrics(syncer, config, NoopMetricsSink)
    }

    /// Create a manager that reports events to `metrics`.
    ///
    /// # Arguments
    ///
    /// * `syncer` - Lifecycle operations for the managed processes
    /// * `config` - Retry timing and health thresholds
    /// * `metrics` - Receiver of every manager event
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_metrics(syncer: S, config: ManagerConfig, metrics: impl MetricsSink + 'static) -> Self {
        let runtime = Handle::current();
        let queue = Arc::new(WorkQueue::new());
        let root = CancellationToken::new();

        let shared = Arc::new(Shared {
            syncer: Arc::new(syncer),
            retry: RetryPolicy::from(&config),
            config,
            table: ProcessTable::new(),
            queue: Arc::clone(&queue),
            metrics: Arc::new(metrics),
            root: root.clone(),
            finished: Notify::new(),
            shutting_down: AtomicBool::new(false),
            runtime: runtime.clone(),
        });

        runtime.spawn(dispatch::run_dispatcher(Arc::downgrade(&shared), queue, root));

        Self { shared }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Submit an update for one process.
    ///
    /// Never waits for the syncer: the update is recorded and the process's
    /// worker is woken. Pending updates coalesce, so only the latest config
    /// reaches the syncer. A `Terminate` takes effect immediately and cannot
    /// be undone; other updates to a terminating process are ignored. A
    /// `Create` for a finished process restarts it under the same id.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::Validation` if:
    /// - The update is malformed (see [`ProcessUpdate::validate`])
    /// - A `Sync` or `Terminate` names an unknown process
    ///
    /// Returns `ManagerError::ShutDown` once shutdown has begun.
    pub fn update_process(&self, update: ProcessUpdate<S::Config>) -> ManagerResult<()> {
        let shared = &self.shared;
        if shared.shutting_down.load(Ordering::SeqCst) {
            return Err(ManagerError::ShutDown);
        }
        update.validate()?;

        let ProcessUpdate {
            id,
            kind,
            config,
            terminate,
        } = update;
        let mut events = Vec::new();
        let mut spawn = None;

        {
            let mut rows = shared.table.lock();
            match rows.get_mut(&id) {
                None => {
                    let Some(config) = config.filter(|_| matches!(kind, UpdateKind::Create | UpdateKind::Update))
                    else {
                        return Err(ValidationError::UnknownProcess { id, kind }.into());
                    };
                    let (wake, rx) = mpsc::channel(1);
                    let generation = shared.table.next_generation();
                    let record = ProcessRecord::new(
                        id.clone(),
                        UpdateKind::Create,
                        config,
                        shared.root.child_token(),
                        Utc::now(),
                    );
                    let entry = ProcessEntry {
                        record,
                        wake,
                        generation,
                    };
                    entry.wake();
                    rows.insert(id.clone(), entry);
                    spawn = Some((generation, rx));
                    debug!(process_id = %id, "process created");
                }
                Some(entry) if entry.record.state() == ProcessState::Finished => match (kind, config) {
                    (UpdateKind::Create, Some(config)) => {
                        let (wake, rx) = mpsc::channel(1);
                        let generation = shared.table.next_generation();
                        let record = ProcessRecord::restarted(
                            &entry.record,
                            config,
                            shared.root.child_token(),
                            Utc::now(),
                        );
                        let restart_count = record.restart_count();
                        *entry = ProcessEntry {
                            record,
                            wake,
                            generation,
                        };
                        entry.wake();
                        spawn = Some((generation, rx));
                        info!(process_id = %id, restart_count, "finished process restarted");
                        events.push(Event::ProcessRestarted {
                            process_id: id.clone(),
                            restart_count,
                        });
                    }
                    (UpdateKind::Terminate, _) => {
                        let completion = terminate.and_then(|options| options.completion);
                        entry.record.register_termination(completion, None);
                    }
                    (kind, _) => {
                        debug!(process_id = %id, %kind, "update ignored for finished process");
                    }
                },
                Some(entry) if kind == UpdateKind::Terminate => {
                    let options = terminate.unwrap_or_default();
                    entry.record.register_termination(options.completion, options.status_fn);
                    events.extend(shared.terminate_entry(entry, options.grace_period_secs, options.evict));
                    debug!(
                        process_id = %id,
                        grace_period_secs = ?entry.record.grace_period_secs(),
                        "termination requested"
                    );
                }
                Some(entry) => {
                    if entry.record.submit(kind, config) {
                        entry.wake();
                    } else {
                        warn!(
                            process_id = %id,
                            %kind,
                            state = %entry.record.state(),
                            "update ignored for terminating process"
                        );
                    }
                }
            }
        }

        if let Some((generation, rx)) = spawn {
            shared.spawn_worker(id, generation, rx);
        }
        shared.emit_all(events);
        Ok(())
    }

    /// Reconcile the tracked processes against the desired set.
    ///
    /// Every tracked process absent from `desired` is flagged as an orphan.
    /// Finished orphans are removed; live orphans are terminated with the
    /// default grace period. Processes back in `desired` lose the flag.
    ///
    /// # Returns
    ///
    /// Snapshots of every process still tracked after the sweep.
    pub fn sync_known_processes(&self, desired: &[ProcessId]) -> BTreeMap<ProcessId, ProcessStatus> {
        let shared = &self.shared;
        let desired: HashSet<&ProcessId> = desired.iter().collect();
        let mut purged = Vec::new();
        let mut events = Vec::new();

        let snapshot = {
            let mut rows = shared.table.lock();
            rows.retain(|id, entry| {
                let orphaned = !desired.contains(id);
                entry.record.set_orphaned(orphaned);
                if orphaned && entry.record.state() == ProcessState::Finished {
                    purged.push(id.clone());
                    return false;
                }
                true
            });

            for entry in rows.values_mut() {
                if entry.record.is_orphaned() && !entry.record.state().is_terminating() {
                    events.extend(shared.terminate_entry(entry, None, false));
                }
            }

            snapshot_rows(&rows, shared.config.unhealthy_error_threshold, Utc::now())
        };

        for id in &purged {
            shared.queue.remove(id);
            info!(process_id = %id, "finished orphan purged");
            events.push(Event::ProcessPurged {
                process_id: id.clone(),
            });
        }
        if !events.is_empty() {
            debug!(
                orphans_terminated = events.len() - purged.len(),
                purged = purged.len(),
                "reconciled known processes"
            );
        }
        shared.emit_all(events);
        snapshot
    }

    pub fn get_process_status(&self, id: &ProcessId) -> Option<ProcessStatus> {
        self.shared
            .table
            .status_of(id, self.shared.config.unhealthy_error_threshold)
    }

    /// True once `id` reached `Terminated` (or `Finished`).
    pub fn is_process_terminated(&self, id: &ProcessId) -> bool {
        self.shared
            .table
            .state_of(id)
            .is_some_and(|state| state >= ProcessState::Terminated)
    }

    pub fn is_process_finished(&self, id: &ProcessId) -> bool {
        self.shared.table.state_of(id) == Some(ProcessState::Finished)
    }

    /// Number of tracked processes, finished ones included.
    pub fn process_count(&self) -> usize {
        self.shared.table.len()
    }

    /// Aggregate health of every tracked process.
    pub fn health(&self) -> HealthSnapshot {
        let depth = self.shared.queue.len();
        let rows = self.shared.table.lock();
        health::health_snapshot(
            &rows,
            self.shared.config.unhealthy_error_threshold,
            depth,
            Utc::now(),
        )
    }

    /// Terminate every process and wait up to `timeout` for all to finish.
    ///
    /// See [`ProcessManager::shutdown_until`].
    pub async fn shutdown(&self, timeout: Duration) -> ManagerResult<()> {
        self.shutdown_until(tokio::time::sleep(timeout)).await
    }

    /// Terminate every process and wait until all are finished or `deadline`
    /// resolves.
    ///
    /// New updates are rejected from the moment this is called. When the
    /// wait ends, workers and the dispatcher are stopped; syncer calls still
    /// running are aborted.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::ShutdownIncomplete` listing every process that
    /// had not finished when the deadline resolved.
    pub async fn shutdown_until(&self, deadline: impl Future<Output = ()>) -> ManagerResult<()> {
        let shared = &self.shared;
        shared.shutting_down.store(true, Ordering::SeqCst);

        let events: Vec<Event> = {
            let mut rows = shared.table.lock();
            info!(processes = rows.len(), "shutting down process manager");
            rows.values_mut()
                .filter(|entry| !entry.record.state().is_terminating())
                .filter_map(|entry| shared.terminate_entry(entry, None, false))
                .collect()
        };
        shared.emit_all(events);

        tokio::pin!(deadline);
        loop {
            let notified = shared.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished().is_empty() {
                break;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = &mut deadline => break,
            }
        }

        shared.root.cancel();
        let unfinished = self.unfinished();
        if unfinished.is_empty() {
            info!("process manager shut down");
            Ok(())
        } else {
            warn!(
                unfinished = unfinished.len(),
                "shutdown deadline reached with unfinished processes"
            );
            Err(ManagerError::ShutdownIncomplete { unfinished })
        }
    }

    fn unfinished(&self) -> Vec<UnfinishedProcess> {
        let rows = self.shared.table.lock();
        let mut unfinished: Vec<UnfinishedProcess> = rows
            .values()
            .filter(|entry| entry.record.state() != ProcessState::Finished)
            .map(|entry| UnfinishedProcess {
                id: entry.record.id().clone(),
                state: entry.record.state(),
            })
            .collect();
        unfinished.sort_by(|a, b| a.id.cmp(&b.id));
        unfinished
    }
}
