//! Mock syncer implementation for testing.
//!
//! Behaviour is scripted per process through [`MockConfig`], so a single
//! `MockSyncer` can drive healthy, failing, panicking and hanging processes
//! side by side. Every call is recorded for later assertions.

use crate::syncer::{StatusReporter, SyncContext, SyncError, SyncOutcome, Syncer};
use async_trait::async_trait;
use parking_lot::Mutex;
use pv_protocol::{ProcessId, SyncPhase, UpdateKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What a mock call does.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Succeed immediately.
    Healthy,
    /// Fail with `SyncError::Persistent`, for the first `times` calls or forever.
    FailPersistent { times: Option<u32> },
    /// Fail with `SyncError::Transient`, for the first `times` calls or forever.
    FailTransient { times: Option<u32> },
    /// `SyncOutcome::Terminal` from `sync_process`, `SyncError::Terminal` elsewhere.
    Terminal,
    Panic,
    /// Never return, even when cancelled.
    Hang,
    /// Sleep, then succeed; returns `SyncError::Cancelled` if cancelled first.
    Slow(Duration),
}

/// Per-process script for [`MockSyncer`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockConfig {
    pub label: String,
    pub sync: MockBehavior,
    pub terminating: MockBehavior,
    pub terminated: MockBehavior,
}

impl MockConfig {
    /// Every phase succeeds.
    pub fn healthy(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sync: MockBehavior::Healthy,
            terminating: MockBehavior::Healthy,
            terminated: MockBehavior::Healthy,
        }
    }

    pub fn with_sync(mut self, behavior: MockBehavior) -> Self {
        self.sync = behavior;
        self
    }

    pub fn with_terminating(mut self, behavior: MockBehavior) -> Self {
        self.terminating = behavior;
        self
    }

    pub fn with_terminated(mut self, behavior: MockBehavior) -> Self {
        self.terminated = behavior;
        self
    }
}

/// One recorded syncer call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub process_id: ProcessId,
    pub phase: SyncPhase,
    /// Update kind for `Sync`-phase calls.
    pub kind: Option<UpdateKind>,
    pub label: String,
    /// Grace period for `Terminating`-phase calls.
    pub grace_period: Option<Duration>,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    failures: HashMap<(ProcessId, SyncPhase), u32>,
    in_flight: HashMap<ProcessId, usize>,
    max_in_flight: HashMap<ProcessId, usize>,
}

/// Decrements the in-flight count when a call ends, however it ends.
struct InFlightGuard {
    state: Arc<Mutex<MockState>>,
    process_id: ProcessId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(count) = state.in_flight.get_mut(&self.process_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Scriptable [`Syncer`] that records every call.
#[derive(Clone, Default)]
pub struct MockSyncer {
    state: Arc<Mutex<MockState>>,
}

impl MockSyncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls so far, in start order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, id: &ProcessId) -> Vec<MockCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| &call.process_id == id)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, id: &ProcessId, phase: SyncPhase) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| &call.process_id == id && call.phase == phase)
            .count()
    }

    /// Highest number of simultaneous calls ever observed for `id`.
    pub fn max_concurrency(&self, id: &ProcessId) -> usize {
        self.state
            .lock()
            .max_in_flight
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest per-process concurrency across all processes.
    pub fn max_concurrency_any(&self) -> usize {
        self.state
            .lock()
            .max_in_flight
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }

    fn enter(
        &self,
        ctx: &SyncContext,
        phase: SyncPhase,
        kind: Option<UpdateKind>,
        config: &MockConfig,
        grace_period: Option<Duration>,
    ) -> InFlightGuard {
        let id = ctx.process_id().clone();
        let mut state = self.state.lock();
        state.calls.push(MockCall {
            process_id: id.clone(),
            phase,
            kind,
            label: config.label.clone(),
            grace_period,
            at: Instant::now(),
        });

        let in_flight = state.in_flight.entry(id.clone()).or_insert(0);
        *in_flight += 1;
        let current = *in_flight;
        let max = state.max_in_flight.entry(id.clone()).or_insert(0);
        *max = (*max).max(current);

        InFlightGuard {
            state: Arc::clone(&self.state),
            process_id: id,
        }
    }

    /// Count a failure for `(id, phase)`; true while still within `times`.
    fn should_fail(&self, id: &ProcessId, phase: SyncPhase, times: Option<u32>) -> bool {
        let mut state = self.state.lock();
        let failed = state.failures.entry((id.clone(), phase)).or_insert(0);
        match times {
            Some(limit) if *failed >= limit => false,
            _ => {
                *failed += 1;
                true
            }
        }
    }

    async fn run(
        &self,
        ctx: &SyncContext,
        phase: SyncPhase,
        behavior: &MockBehavior,
        label: &str,
    ) -> Result<SyncOutcome, SyncError> {
        match behavior {
            MockBehavior::Healthy => Ok(SyncOutcome::Running),
            MockBehavior::FailPersistent { times } => {
                if self.should_fail(ctx.process_id(), phase, *times) {
                    Err(SyncError::Persistent(format!("{} {} failed", label, phase)))
                } else {
                    Ok(SyncOutcome::Running)
                }
            }
            MockBehavior::FailTransient { times } => {
                if self.should_fail(ctx.process_id(), phase, *times) {
                    Err(SyncError::Transient(format!("{} {} unavailable", label, phase)))
                } else {
                    Ok(SyncOutcome::Running)
                }
            }
            MockBehavior::Terminal => match phase {
                SyncPhase::Sync => Ok(SyncOutcome::Terminal),
                _ => Err(SyncError::Terminal(format!("{} {} is terminal", label, phase))),
            },
            MockBehavior::Panic => panic!("mock syncer panic in {} for {}", phase, label),
            MockBehavior::Hang => std::future::pending::<Result<SyncOutcome, SyncError>>().await,
            MockBehavior::Slow(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(SyncOutcome::Running),
                    _ = ctx.cancelled() => Err(SyncError::Cancelled),
                }
            }
        }
    }
}

#[async_trait]
impl Syncer for MockSyncer {
    type Config = MockConfig;

    async fn sync_process(
        &self,
        ctx: &SyncContext,
        kind: UpdateKind,
        config: &MockConfig,
    ) -> Result<SyncOutcome, SyncError> {
        let _guard = self.enter(ctx, SyncPhase::Sync, Some(kind), config, None);
        self.run(ctx, SyncPhase::Sync, &config.sync, &config.label)
            .await
    }

    async fn sync_terminating_process(
        &self,
        ctx: &SyncContext,
        config: &MockConfig,
        grace_period: Duration,
        status: &StatusReporter,
    ) -> Result<(), SyncError> {
        let _guard = self.enter(
            ctx,
            SyncPhase::Terminating,
            None,
            config,
            Some(grace_period),
        );
        status.report(&format!("stopping {}", config.label));
        self.run(ctx, SyncPhase::Terminating, &config.terminating, &config.label)
            .await
            .map(|_| ())
    }

    async fn sync_terminated_process(
        &self,
        ctx: &SyncContext,
        config: &MockConfig,
    ) -> Result<(), SyncError> {
        let _guard = self.enter(ctx, SyncPhase::Terminated, None, config, None);
        self.run(ctx, SyncPhase::Terminated, &config.terminated, &config.label)
            .await
            .map(|_| ())
    }
}
