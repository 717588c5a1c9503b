//! Runtime configuration of a process manager.
//!
//! [`ManagerConfig`] is the in-memory form of
//! [`pv_protocol::ManagerSettings`]: the same knobs, with intervals as
//! `Duration`s and defaults applied.

use pv_protocol::config_models::{
    ManagerSettings, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CEILING_MS,
    DEFAULT_GRACE_PERIOD_SECS, DEFAULT_JITTER_FRACTION, DEFAULT_RESYNC_INTERVAL_MS,
    DEFAULT_TRANSIENT_RETRY_MS, DEFAULT_UNHEALTHY_ERROR_THRESHOLD,
};
use std::time::Duration;

/// Timing and health thresholds used by workers and the retry queue.
///
/// # Example
///
/// ```rust
/// use pv_core::config::models::ManagerConfig;
/// use std::time::Duration;
///
/// let config = ManagerConfig::default()
///     .with_resync_interval(Duration::from_secs(5))
///     .with_jitter_fraction(0.0);
/// assert_eq!(config.resync_interval, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Delay before resyncing a process whose last sync succeeded.
    pub resync_interval: Duration,

    /// Delay before retrying after a transient or cancelled sync.
    pub transient_retry_interval: Duration,

    /// Backoff after the first persistent failure.
    pub backoff_base: Duration,

    /// Upper bound for exponential backoff.
    pub backoff_ceiling: Duration,

    /// Fraction in `[0, 1]` by which every retry delay is perturbed.
    pub jitter_fraction: f64,

    /// Grace period applied when a termination request carries none.
    pub default_grace_period_secs: u64,

    /// A process with this many consecutive persistent errors is unhealthy.
    pub unhealthy_error_threshold: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_millis(DEFAULT_RESYNC_INTERVAL_MS),
            transient_retry_interval: Duration::from_millis(DEFAULT_TRANSIENT_RETRY_MS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_ceiling: Duration::from_millis(DEFAULT_BACKOFF_CEILING_MS),
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            default_grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            unhealthy_error_threshold: DEFAULT_UNHEALTHY_ERROR_THRESHOLD,
        }
    }
}

impl From<&ManagerSettings> for ManagerConfig {
    fn from(settings: &ManagerSettings) -> Self {
        Self {
            resync_interval: Duration::from_millis(settings.resync_interval_ms),
            transient_retry_interval: Duration::from_millis(settings.transient_retry_ms),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_ceiling: Duration::from_millis(settings.backoff_ceiling_ms),
            jitter_fraction: settings.jitter_fraction.clamp(0.0, 1.0),
            default_grace_period_secs: settings.default_grace_period_secs.max(1),
            unhealthy_error_threshold: settings.unhealthy_error_threshold,
        }
    }
}

impl ManagerConfig {
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn with_transient_retry_interval(mut self, interval: Duration) -> Self {
        self.transient_retry_interval = interval;
        self
    }

    /// Set the exponential backoff base and ceiling.
    pub fn with_backoff(mut self, base: Duration, ceiling: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_ceiling = ceiling;
        self
    }

    /// Set the jitter fraction, clamped to `[0, 1]`.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Set the default grace period, at least one second.
    pub fn with_default_grace_period_secs(mut self, secs: u64) -> Self {
        self.default_grace_period_secs = secs.max(1);
        self
    }

    pub fn with_unhealthy_error_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_error_threshold = threshold;
        self
    }
}
