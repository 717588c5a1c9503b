//! Per-process worker loop.
//!
//! Each process generation gets one worker task. The worker sleeps until it
//! is woken, claims the pending update under the table lock, runs the matching
//! syncer call with the lock released, then applies the result and schedules
//! the next turn. Because a process only ever has one worker and a worker
//! runs one call at a time, syncer calls for the same process never overlap.

use super::Shared;
use crate::state::process::Turn;
use crate::syncer::{StatusReporter, SyncContext, SyncError, SyncOutcome, Syncer};
use chrono::Utc;
use pv_protocol::{Event, ProcessId, ProcessState, SyncPhase};
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Step {
    Continue,
    Exit,
}

/// Worker task body.
///
/// Exits when the wake channel closes (row purged or replaced), the manager
/// shuts down, the process finishes, or its row no longer belongs to
/// `generation`.
pub(super) async fn run_worker<S: Syncer>(
    shared: Weak<Shared<S>>,
    id: ProcessId,
    generation: u64,
    mut wake: mpsc::Receiver<()>,
    root: CancellationToken,
) {
    info!(process_id = %id, generation, "worker started");

    loop {
        tokio::select! {
            biased;
            _ = root.cancelled() => break,
            signal = wake.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        if let Step::Exit = shared.run_turn(&id, generation, &root).await {
            break;
        }
    }

    info!(process_id = %id, generation, "worker stopped");
}

impl<S: Syncer> Shared<S> {
    /// Re-arm a process whose retry delay elapsed and wake its worker.
    pub(super) fn wake_for_requeue(&self, id: &ProcessId) {
        let mut rows = self.table.lock();
        if let Some(entry) = rows.get_mut(id) {
            if entry.record.arm_resync() {
                entry.wake();
            }
        }
    }

    /// Record a termination progress message and forward it.
    fn record_progress(&self, id: &ProcessId, message: &str) {
        let (status, status_fn) = {
            let mut rows = self.table.lock();
            let Some(entry) = rows.get_mut(id) else {
                return;
            };
            entry.record.record_progress(message);
            (
                entry
                    .record
                    .snapshot(self.config.unhealthy_error_threshold, Utc::now()),
                entry.record.status_fn(),
            )
        };

        debug!(process_id = %id, message, "termination progress");
        if let Some(status_fn) = status_fn {
            status_fn(&status);
        }
        self.metrics.emit(&Event::ProcessTerminationProgress {
            process_id: id.clone(),
            message: message.to_string(),
        });
    }

    async fn run_turn(self: &Arc<Self>, id: &ProcessId, generation: u64, root: &CancellationToken) -> Step {
        let turn = {
            let mut rows = self.table.lock();
            let Some(entry) = rows.get_mut(id) else {
                return Step::Exit;
            };
            if entry.generation != generation || entry.record.state() == ProcessState::Finished {
                return Step::Exit;
            }
            match entry.record.start_turn(&self.root, Utc::now()) {
                Some(turn) => turn,
                None => return Step::Continue,
            }
        };

        let started = Instant::now();
        let (result, aborted) = self.call_syncer(id, &turn, root).await;
        let duration = started.elapsed();

        let report = {
            let mut rows = self.table.lock();
            let Some(entry) = rows.get_mut(id) else {
                return Step::Exit;
            };
            if entry.generation != generation {
                return Step::Exit;
            }
            entry.record.finish_turn(
                &turn,
                result.clone(),
                self.config.default_grace_period_secs,
                Utc::now(),
            )
        };

        for waiter in report.terminated_waiters {
            let _ = waiter.send(());
        }

        match &result {
            Ok(_) => debug!(
                process_id = %id,
                phase = %turn.phase,
                kind = %turn.kind,
                duration_ms = duration.as_millis() as u64,
                "sync completed"
            ),
            Err(err) => warn!(
                process_id = %id,
                phase = %turn.phase,
                kind = %turn.kind,
                error = %err,
                superseded = report.superseded,
                "sync failed"
            ),
        }

        let mut events = vec![Event::ProcessSynced {
            process_id: id.clone(),
            phase: turn.phase,
            update_kind: turn.kind,
            duration_ms: duration.as_millis() as u64,
            error: report.error,
        }];
        if report.from != report.to {
            info!(process_id = %id, from = %report.from, to = %report.to, "process state changed");
            events.push(Event::ProcessStateChanged {
                process_id: id.clone(),
                from: report.from,
                to: report.to,
            });
        }
        if report.to == ProcessState::Finished {
            self.finished.notify_waiters();
        }

        let step = match (report.retry, aborted) {
            (Some(reason), false) => {
                let delay = self.retry.delay_for(reason);
                self.queue.enqueue(id.clone(), delay);
                events.push(Event::ProcessRetryScheduled {
                    process_id: id.clone(),
                    reason,
                    delay_ms: delay.as_millis() as u64,
                });
                Step::Continue
            }
            _ => Step::Exit,
        };

        self.emit_all(events);
        step
    }

    /// Run the syncer call for `turn` in its own task.
    ///
    /// A panic becomes `SyncError::Panicked`. If the manager shuts down
    /// first, the call is aborted and the second value is `true`.
    async fn call_syncer(
        self: &Arc<Self>,
        id: &ProcessId,
        turn: &Turn<S::Config>,
        root: &CancellationToken,
    ) -> (Result<SyncOutcome, SyncError>, bool) {
        let syncer = Arc::clone(&self.syncer);
        let ctx = SyncContext::new(id.clone(), turn.token.clone());
        let phase = turn.phase;
        let kind = turn.kind;
        let config = turn.config.clone();
        let grace_period = turn
            .grace_period
            .unwrap_or(Duration::from_secs(self.config.default_grace_period_secs));
        let reporter = {
            let shared = Arc::downgrade(self);
            let id = id.clone();
            StatusReporter::new(move |message| {
                if let Some(shared) = shared.upgrade() {
                    shared.record_progress(&id, message);
                }
            })
        };

        let mut call = tokio::spawn(async move {
            match phase {
                SyncPhase::Sync => syncer.sync_process(&ctx, kind, &config).await,
                SyncPhase::Terminating => syncer
                    .sync_terminating_process(&ctx, &config, grace_period, &reporter)
                    .await
                    .map(|()| SyncOutcome::Running),
                SyncPhase::Terminated => syncer
                    .sync_terminated_process(&ctx, &config)
                    .await
                    .map(|()| SyncOutcome::Running),
            }
        });

        tokio::select! {
            joined = &mut call => match joined {
                Ok(result) => (result, false),
                Err(err) if err.is_panic() => {
                    let message = panic_message(err.into_panic());
                    warn!(process_id = %id, phase = %phase, panic = %message, "syncer panicked");
                    (Err(SyncError::Panicked(message)), false)
                }
                Err(_) => (Err(SyncError::Cancelled), false),
            },
            _ = root.cancelled() => {
                call.abort();
                (Err(SyncError::Cancelled), true)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
