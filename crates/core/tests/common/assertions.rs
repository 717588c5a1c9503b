//! Assertion helpers and a recording metrics sink.

use parking_lot::Mutex;
use pv_core::metrics::MetricsSink;
use pv_core::syncer::mock::MockSyncer;
use pv_core::ProcessManager;
use pv_protocol::{Event, ProcessId, ProcessState};
use std::sync::Arc;
use std::time::Duration;

/// Default wait for real-time integration tests.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(10);

/// Install a tracing subscriber once; controlled by `RUST_LOG`.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Metrics sink that keeps every event for later inspection.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, id: &ProcessId) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.process_id() == id)
            .cloned()
            .collect()
    }

    /// `(from, to)` pairs of every state change reported for `id`.
    pub fn state_changes(&self, id: &ProcessId) -> Vec<(ProcessState, ProcessState)> {
        self.events_for(id)
            .into_iter()
            .filter_map(|event| match event {
                Event::ProcessStateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Poll `check` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `id` is at least in `state`.
#[allow(dead_code)]
pub async fn wait_for_state(
    manager: &ProcessManager<MockSyncer>,
    id: &ProcessId,
    state: ProcessState,
) -> bool {
    eventually(WAIT, || {
        manager
            .get_process_status(id)
            .is_some_and(|status| status.state >= state)
    })
    .await
}

/// Assert that the reported state changes for `id` only ever move forward
/// and chain onto each other.
#[allow(dead_code)]
pub fn assert_forward_only(changes: &[(ProcessState, ProcessState)]) {
    for (from, to) in changes {
        assert!(from < to, "state moved backwards: {:?} -> {:?}", from, to);
    }
    for pair in changes.windows(2) {
        assert_eq!(
            pair[0].1, pair[1].0,
            "state changes do not chain: {:?}",
            changes
        );
    }
}
