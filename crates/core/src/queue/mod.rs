//! Retry scheduling.
//!
//! This module provides:
//! - [`workqueue::WorkQueue`]: ids ordered by the instant they become ready
//! - [`backoff`]: jitter, exponential backoff and the retry policy

pub mod backoff;
pub mod workqueue;

pub use backoff::RetryPolicy;
pub use workqueue::WorkQueue;
