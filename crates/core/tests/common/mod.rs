//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality across the manager tests:
//! - Test fixtures (ids, fast configs, managers wired to a mock syncer)
//! - A recording metrics sink
//! - Polling assertions

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
