//! Updates submitted to the process manager.

use crate::error::ValidationError;
use crate::state::StatusFn;
use pv_protocol::{ProcessId, ProcessStatus, UpdateKind};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Options carried by a `Terminate` update.
#[derive(Default)]
pub struct TerminateOptions {
    /// Requested grace period. The first request defaults to the manager's
    /// default grace period; later requests can only lower it.
    pub grace_period_secs: Option<u64>,

    /// The process is being removed to free resources.
    pub evict: bool,

    /// Fired once the process reaches `Terminated`.
    pub completion: Option<oneshot::Sender<()>>,

    /// Called with a fresh snapshot on every progress report while
    /// terminating.
    pub status_fn: Option<StatusFn>,
}

impl TerminateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_period_secs(mut self, secs: u64) -> Self {
        self.grace_period_secs = Some(secs);
        self
    }

    pub fn evict(mut self) -> Self {
        self.evict = true;
        self
    }

    pub fn with_completion(mut self, completion: oneshot::Sender<()>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Attach a fresh completion channel and return its receiver.
    pub fn with_completion_channel(self) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (self.with_completion(tx), rx)
    }

    pub fn with_status_fn(mut self, status_fn: impl Fn(&ProcessStatus) + Send + Sync + 'static) -> Self {
        self.status_fn = Some(Arc::new(status_fn));
        self
    }
}

impl fmt::Debug for TerminateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminateOptions")
            .field("grace_period_secs", &self.grace_period_secs)
            .field("evict", &self.evict)
            .field("completion", &self.completion.is_some())
            .field("status_fn", &self.status_fn.is_some())
            .finish()
    }
}

/// A request to change one process.
///
/// # Example
///
/// ```rust
/// use pv_core::manager::{ProcessUpdate, TerminateOptions};
/// use pv_protocol::ProcessId;
///
/// let id = ProcessId::new("db-conn-1").unwrap();
/// let create = ProcessUpdate::create(id.clone(), "postgres://db/app".to_string());
/// let stop: ProcessUpdate<String> =
///     ProcessUpdate::terminate(id, TerminateOptions::new().with_grace_period_secs(5));
/// assert!(create.validate().is_ok());
/// assert!(stop.validate().is_ok());
/// ```
#[derive(Debug)]
pub struct ProcessUpdate<C> {
    pub id: ProcessId,
    pub kind: UpdateKind,
    pub config: Option<C>,
    pub terminate: Option<TerminateOptions>,
}

impl<C> ProcessUpdate<C> {
    pub fn create(id: ProcessId, config: C) -> Self {
        Self {
            id,
            kind: UpdateKind::Create,
            config: Some(config),
            terminate: None,
        }
    }

    pub fn update(id: ProcessId, config: C) -> Self {
        Self {
            id,
            kind: UpdateKind::Update,
            config: Some(config),
            terminate: None,
        }
    }

    /// Resync with the last known config.
    pub fn sync(id: ProcessId) -> Self {
        Self {
            id,
            kind: UpdateKind::Sync,
            config: None,
            terminate: None,
        }
    }

    pub fn terminate(id: ProcessId, options: TerminateOptions) -> Self {
        Self {
            id,
            kind: UpdateKind::Terminate,
            config: None,
            terminate: Some(options),
        }
    }

    /// Shape checks that do not need the process table.
    ///
    /// # Errors
    ///
    /// - `InvalidProcessId` if the id is malformed
    /// - `MissingConfig` for a `Create` or `Update` without config
    /// - `UnexpectedTerminateOptions` for terminate options on another kind
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.id.validate()?;
        match self.kind {
            UpdateKind::Create | UpdateKind::Update if self.config.is_none() => {
                Err(ValidationError::MissingConfig {
                    id: self.id.clone(),
                    kind: self.kind,
                })
            }
            UpdateKind::Terminate => Ok(()),
            _ if self.terminate.is_some() => Err(ValidationError::UnexpectedTerminateOptions {
                id: self.id.clone(),
                kind: self.kind,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: &str) -> ProcessId {
        ProcessId::new(id).unwrap()
    }

    #[test]
    fn test_constructors_validate() {
        assert!(ProcessUpdate::create(pid("a"), 1u32).validate().is_ok());
        assert!(ProcessUpdate::update(pid("a"), 2u32).validate().is_ok());
        assert!(ProcessUpdate::<u32>::sync(pid("a")).validate().is_ok());
        assert!(ProcessUpdate::<u32>::terminate(pid("a"), TerminateOptions::new())
            .validate()
            .is_ok());
    }

    #[test]
    fn test_missing_config_is_rejected() {
        let update = ProcessUpdate::<u32> {
            id: pid("a"),
            kind: UpdateKind::Update,
            config: None,
            terminate: None,
        };
        assert_eq!(
            update.validate(),
            Err(ValidationError::MissingConfig {
                id: pid("a"),
                kind: UpdateKind::Update
            })
        );
    }

    #[test]
    fn test_terminate_options_on_create_are_rejected() {
        let mut update = ProcessUpdate::create(pid("a"), 1u32);
        update.terminate = Some(TerminateOptions::new());
        assert!(matches!(
            update.validate(),
            Err(ValidationError::UnexpectedTerminateOptions { .. })
        ));
    }

    #[test]
    fn test_terminate_options_builder() {
        let (options, _rx) = TerminateOptions::new()
            .with_grace_period_secs(3)
            .evict()
            .with_status_fn(|_| {})
            .with_completion_channel();

        assert_eq!(options.grace_period_secs, Some(3));
        assert!(options.evict);
        assert!(options.completion.is_some());
        assert!(options.status_fn.is_some());
        assert!(format!("{:?}", options).contains("evict: true"));
    }
}
