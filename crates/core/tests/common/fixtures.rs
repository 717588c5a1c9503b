//! Test fixtures for building managers and processes.

use crate::common::assertions::RecordingSink;
use pv_core::syncer::mock::{MockConfig, MockSyncer};
use pv_core::{ManagerConfig, ProcessManager, ProcessUpdate};
use pv_protocol::ProcessId;
use std::time::Duration;

/// Shorthand for a valid process id.
#[allow(dead_code)]
pub fn pid(id: &str) -> ProcessId {
    ProcessId::new(id).expect("test ids are valid")
}

/// Config with millisecond timings so lifecycles complete quickly.
#[allow(dead_code)]
pub fn create_test_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_resync_interval(Duration::from_millis(50))
        .with_transient_retry_interval(Duration::from_millis(10))
        .with_backoff(Duration::from_millis(10), Duration::from_millis(80))
        .with_jitter_fraction(0.1)
        .with_default_grace_period_secs(1)
}

/// A manager over `syncer` that records every event it emits.
#[allow(dead_code)]
pub fn create_test_manager(
    syncer: MockSyncer,
    config: ManagerConfig,
) -> (ProcessManager<MockSyncer>, RecordingSink) {
    let sink = RecordingSink::default();
    let manager = ProcessManager::with_metrics(syncer, config, sink.clone());
    (manager, sink)
}

/// Submit a `Create` for a process running `config`.
#[allow(dead_code)]
pub fn create_process(manager: &ProcessManager<MockSyncer>, id: &str, config: MockConfig) {
    manager
        .update_process(ProcessUpdate::create(pid(id), config))
        .expect("create should be accepted");
}

/// Submit a `Create` for a process whose every phase succeeds.
#[allow(dead_code)]
pub fn create_healthy_process(manager: &ProcessManager<MockSyncer>, id: &str) {
    create_process(manager, id, MockConfig::healthy(id));
}
