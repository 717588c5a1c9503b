//! Process manager settings.
//!
//! This module defines the serializable form of the manager's tuning knobs,
//! as it appears in a settings file handed to the manager by its host.

use serde::Deserialize;
use serde::Serialize;
use ts_rs::TS;

/// Default interval between resyncs of a healthy process.
pub const DEFAULT_RESYNC_INTERVAL_MS: u64 = 30_000;

/// Default retry interval after a transient error.
pub const DEFAULT_TRANSIENT_RETRY_MS: u64 = 1_000;

/// Default first backoff after a persistent error.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;

/// Default upper bound for exponential backoff.
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 300_000;

/// Default jitter fraction applied to every retry delay.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.5;

/// Default grace period when a termination request does not carry one.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Default number of persistent errors after which a process is unhealthy.
pub const DEFAULT_UNHEALTHY_ERROR_THRESHOLD: u32 = 5;

/// Manager settings with defaults for every field.
///
/// # Example
///
/// ```toml
/// resync_interval_ms = 30000
/// backoff_base_ms = 5000
/// backoff_ceiling_ms = 300000
/// jitter_fraction = 0.5
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(default)]
pub struct ManagerSettings {
    /// Delay before resyncing a process whose last sync succeeded.
    #[ts(type = "number")]
    pub resync_interval_ms: u64,

    /// Delay before retrying after a transient sync error.
    #[ts(type = "number")]
    pub transient_retry_ms: u64,

    /// Backoff after the first persistent error; doubles per failure.
    #[ts(type = "number")]
    pub backoff_base_ms: u64,

    /// Cap for the exponential backoff.
    #[ts(type = "number")]
    pub backoff_ceiling_ms: u64,

    /// Random perturbation of each delay, as a fraction in `[0, 1]`.
    pub jitter_fraction: f64,

    #[ts(type = "number")]
    pub default_grace_period_secs: u64,

    pub unhealthy_error_threshold: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            resync_interval_ms: DEFAULT_RESYNC_INTERVAL_MS,
            transient_retry_ms: DEFAULT_TRANSIENT_RETRY_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_ceiling_ms: DEFAULT_BACKOFF_CEILING_MS,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            default_grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            unhealthy_error_threshold: DEFAULT_UNHEALTHY_ERROR_THRESHOLD,
        }
    }
}
