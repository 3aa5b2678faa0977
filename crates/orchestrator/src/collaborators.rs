//! Ports through which the engine reaches its external collaborators.
//!
//! The engine never knows what work happens inside a process or how the
//! next schedule is chosen. It only sees these traits, so the inputs and
//! outputs of every call can be logged, mocked and replayed.

use async_trait::async_trait;
use flow_core::{ConsultationKind, ConsultationOutcome, Process, Schedule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by an executor or selector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything an executor is told about the position it must work on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionContext {
    pub session_id: Uuid,
    pub schedule: Schedule,
    pub process: Process,
    /// Outcome of the consultation raised by the previous call for this
    /// position, if any.
    pub consultation: Option<ConsultationOutcome>,
}

/// What the executor wants to happen after working on a process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum ExecutorDirective {
    /// Move to another process in the same schedule.
    Advance { next: Process },
    /// Leave the schedule and return to schedule selection.
    ExitToSelection,
    /// Human input is needed before the process can finish. The executor is
    /// called again for the same position once the consultation resolves.
    ConsultationNeeded {
        prompt: String,
        kind: ConsultationKind,
        timeout_seconds: u64,
    },
}

/// What the selector decided at a schedule boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", content = "schedule", rename_all = "snake_case")]
pub enum SelectorDecision {
    Enter(Schedule),
    AttemptTerminate,
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Perform the work of `context.schedule`/`context.process`.
    async fn execute(
        &self,
        context: &ExecutionContext,
    ) -> std::result::Result<ExecutorDirective, CollaboratorError>;
}

#[async_trait]
pub trait ScheduleSelector: Send + Sync {
    /// Pick the next schedule.
    ///
    /// `termination_rejected` is true when this call follows a termination
    /// attempt that the engine refused; the selector must then return a
    /// schedule.
    async fn select_next(
        &self,
        visited: &BTreeSet<Schedule>,
        termination_rejected: bool,
    ) -> std::result::Result<SelectorDecision, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_serialization() {
        let json = serde_json::to_string(&ExecutorDirective::Advance { next: Process::P2 }).unwrap();
        assert_eq!(json, r#"{"directive":"advance","next":"P2"}"#);

        let json = serde_json::to_string(&SelectorDecision::Enter(Schedule::Scale)).unwrap();
        assert_eq!(json, r#"{"decision":"enter","schedule":"scale"}"#);
    }

    #[test]
    fn test_collaborator_error_display() {
        assert_eq!(CollaboratorError::new("rate limited").to_string(), "rate limited");
    }
}
