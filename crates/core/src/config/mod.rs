//! Configuration loading and management.
//!
//! This module turns a settings file (TOML or YAML) into the runtime
//! [`models::ManagerConfig`] used by the process manager.

pub mod error;
pub mod loader;
pub mod models;
