//! # pv-protocol
//!
//! Shared models for procvisor.
//!
//! This crate defines the data structures a process manager exposes to the
//! outside world:
//! - Process identity and lifecycle state
//! - Per-process status and manager-wide health snapshots
//! - Events emitted on state transitions and sync completions
//! - Serializable manager settings
//!
//! ## Modules
//!
//! - [`process_models`]: `ProcessId`, `ProcessState`, `UpdateKind`, `ProcessStatus`
//! - [`health_models`]: `HealthSnapshot`
//! - [`events`]: `Event` and `RetryReason`
//! - [`config_models`]: `ManagerSettings`
//!
//! ## Design Principles
//!
//! - Minimal dependencies: serde, ts-rs, uuid, chrono, thiserror
//! - TypeScript generation: all types derive `TS` for dashboard clients
//! - Independent compilation: no dependencies on other procvisor crates

pub mod config_models;
pub mod events;
pub mod health_models;
pub mod process_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use events::*;
pub use health_models::*;
pub use process_models::*;
