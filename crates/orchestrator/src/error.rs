use flow_core::{CoreError, OrchestrationStatus, Process, Schedule};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::navigation::NavigationTarget;

/// Which external collaborator a step failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Executor,
    Selector,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executor => f.write_str("executor"),
            Self::Selector => f.write_str("selector"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid navigation from {from} to {to}")]
    InvalidNavigation {
        from: Process,
        to: NavigationTarget,
    },

    #[error("Engine is closed ({})", .status.as_str())]
    EngineClosed { status: OrchestrationStatus },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Malformed flow code {input:?} at offset {offset}: {reason}")]
    MalformedFlowCode {
        input: String,
        offset: usize,
        reason: String,
    },

    #[error("Step failed in {collaborator} at {schedule}/{process}: {message}")]
    Step {
        collaborator: Collaborator,
        schedule: Schedule,
        process: Process,
        message: String,
    },

    #[error("Stale snapshot for session {session_id}: revision {offered} is older than stored revision {stored}")]
    StaleSnapshot {
        session_id: Uuid,
        offered: u64,
        stored: u64,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Create a step error for a failed collaborator call.
    pub fn step(
        collaborator: Collaborator,
        position: (Schedule, Process),
        message: impl Into<String>,
    ) -> Self {
        Self::Step {
            collaborator,
            schedule: position.0,
            process: position.1,
            message: message.into(),
        }
    }

    /// Caller misuse. Never retried; should end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidNavigation { .. } | Self::EngineClosed { .. } | Self::InvalidState(_)
        )
    }

    /// Collaborator failures that leave state untouched, so the step can be retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Step { .. })
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedFlowCode {
                input,
                offset,
                reason,
            } => Self::MalformedFlowCode {
                input,
                offset,
                reason,
            },
            CoreError::InvalidState(msg) => Self::InvalidState(msg),
            CoreError::Validation(msg) => Self::InvalidState(msg),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
