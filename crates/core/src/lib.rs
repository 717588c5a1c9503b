//! # pv-core
//!
//! Concurrent process lifecycle manager for procvisor.
//!
//! This crate provides:
//! - A process manager that drives each process through
//!   `Starting -> Syncing -> Terminating -> Terminated -> Finished`
//! - One worker per process, with coalesced updates and at most one syncer
//!   call in flight per process
//! - A delay-ordered retry queue with jitter and exponential backoff
//! - Reconciliation against a desired set of processes
//! - Metrics events and health snapshots
//! - Settings loading from TOML or YAML
//!
//! ## Modules
//!
//! - [`manager`]: `ProcessManager`, `ProcessUpdate`, worker and dispatcher
//! - [`syncer`]: the `Syncer` trait callers implement, plus `MockSyncer`
//! - [`state`]: per-process records and the status store
//! - [`queue`]: work queue and retry policy
//! - [`metrics`]: event sinks
//! - [`config`]: settings loading and runtime configuration
//! - [`error`]: manager and validation errors

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod state;
pub mod syncer;

pub use config::models::ManagerConfig;
pub use error::{ManagerError, ManagerResult, ValidationError};
pub use manager::{ProcessManager, ProcessUpdate, TerminateOptions};
pub use metrics::{ChannelMetricsSink, MetricsSink, NoopMetricsSink};
pub use syncer::{StatusReporter, SyncContext, SyncError, SyncOutcome, Syncer};
