//! Error types returned by the process manager API.
//!
//! Only validation and shutdown failures reach a caller synchronously. Errors
//! raised by a syncer are recorded on the process and surface through status
//! snapshots and events (see [`crate::syncer::SyncError`]).

use pv_protocol::{InvalidProcessId, ProcessId, ProcessState, UpdateKind};
use std::fmt;
use thiserror::Error;

/// A malformed update, rejected before it reaches the state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid process id: {0}")]
    InvalidProcessId(#[from] InvalidProcessId),

    #[error("{kind} update for process {id} has no config")]
    MissingConfig { id: ProcessId, kind: UpdateKind },

    #[error("{kind} update for unknown process {id}")]
    UnknownProcess { id: ProcessId, kind: UpdateKind },

    #[error("terminate options attached to {kind} update for process {id}")]
    UnexpectedTerminateOptions { id: ProcessId, kind: UpdateKind },
}

/// A process that had not finished when shutdown gave up waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfinishedProcess {
    pub id: ProcessId,
    pub state: ProcessState,
}

impl fmt::Display for UnfinishedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.state)
    }
}

/// Errors returned by [`crate::ProcessManager`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("process manager is shut down")]
    ShutDown,

    #[error(
        "{} process(es) did not finish before the shutdown deadline: {}",
        unfinished.len(),
        join_unfinished(unfinished)
    )]
    ShutdownIncomplete { unfinished: Vec<UnfinishedProcess> },
}

fn join_unfinished(unfinished: &[UnfinishedProcess]) -> String {
    unfinished
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Type alias for Result with ManagerError.
pub type ManagerResult<T> = Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_incomplete_lists_processes() {
        let err = ManagerError::ShutdownIncomplete {
            unfinished: vec![
                UnfinishedProcess {
                    id: ProcessId::new("a").unwrap(),
                    state: ProcessState::Terminating,
                },
                UnfinishedProcess {
                    id: ProcessId::new("b").unwrap(),
                    state: ProcessState::Terminated,
                },
            ],
        };

        assert_eq!(
            err.to_string(),
            "2 process(es) did not finish before the shutdown deadline: a (Terminating), b (Terminated)"
        );
    }

    #[test]
    fn test_validation_error_converts() {
        let err: ManagerError = ValidationError::from(InvalidProcessId::Empty).into();
        assert!(matches!(
            err,
            ManagerError::Validation(ValidationError::InvalidProcessId(InvalidProcessId::Empty))
        ));
    }
}
