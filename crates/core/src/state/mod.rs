//! Process status store.
//!
//! This module provides:
//! - [`process::ProcessRecord`]: the per-process row and its transition rules
//! - [`store::ProcessTable`]: the locked map of all rows

pub mod process;
pub mod store;

pub use process::{ProcessRecord, StatusFn};
pub use store::ProcessTable;
