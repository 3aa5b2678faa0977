//! Event types emitted by the orchestration engine

use chrono::{DateTime, Utc};
use flow_core::{
    ConsultationKind, ConsultationOutcome, ConsultationRequest, OrchestrationState,
    OrchestrationStatus, Process, Schedule,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the publishing bus's stream, starting at 0
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(sequence: u64, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Read-only view of an orchestration state, as carried by `StateChanged`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StateView {
    pub schedule: Schedule,
    pub process: Process,
    pub status: OrchestrationStatus,
    pub visited: Vec<Schedule>,
    pub flow_code: String,
    pub revision: u64,
    pub pending_consultation: Option<ConsultationKind>,
}

impl StateView {
    pub fn capture(state: &OrchestrationState, revision: u64) -> Self {
        Self {
            schedule: state.current_schedule(),
            process: state.current_process(),
            status: state.status(),
            visited: state.visited_schedules().iter().copied().collect(),
            flow_code: state.flow_code().encode(),
            revision,
            pending_consultation: state.pending_consultation().map(|r| r.kind),
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// State was mutated (start, transition, consultation status change)
    #[serde(rename = "orchestration.state_changed")]
    StateChanged { session_id: Uuid, state: StateView },

    /// A process reached a consultation point and is waiting for a human
    #[serde(rename = "consultation.raised")]
    ConsultationRaised {
        session_id: Uuid,
        request: ConsultationRequest,
    },

    /// A consultation was answered, fell back, or was cancelled
    #[serde(rename = "consultation.resolved")]
    ConsultationResolved {
        session_id: Uuid,
        outcome: ConsultationOutcome,
    },

    /// A mandatory consultation timed out and approval was assumed
    #[serde(rename = "consultation.timed_out_mandatory")]
    ConsultationTimedOutMandatory {
        session_id: Uuid,
        prompt: String,
        raised_at: (Schedule, Process),
        fallback: String,
    },

    /// The selector tried to stop before every schedule was complete
    #[serde(rename = "orchestration.termination_rejected")]
    TerminationRejected {
        session_id: Uuid,
        missing: Vec<Schedule>,
        last_position: Option<(Schedule, Process)>,
    },

    /// The orchestration reached its terminal success state
    #[serde(rename = "orchestration.terminated")]
    Terminated { session_id: Uuid, flow_code: String },

    /// The orchestration was aborted
    #[serde(rename = "orchestration.aborted")]
    Aborted { session_id: Uuid, reason: String },
}

impl Event {
    /// Get the session ID this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            Event::StateChanged { session_id, .. }
            | Event::ConsultationRaised { session_id, .. }
            | Event::ConsultationResolved { session_id, .. }
            | Event::ConsultationTimedOutMandatory { session_id, .. }
            | Event::TerminationRejected { session_id, .. }
            | Event::Terminated { session_id, .. }
            | Event::Aborted { session_id, .. } => *session_id,
        }
    }

    /// Diagnostic events report a recoverable condition for audit
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Event::ConsultationTimedOutMandatory { .. } | Event::TerminationRejected { .. }
        )
    }
}
