use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::consultation::ConsultationRequest;
use super::flow_code::{FlowCodeEntry, FlowCodeLog};
use super::schedule::{Process, Schedule};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    #[default]
    NotStarted,
    Running,
    AwaitingConsultation,
    Terminated,
    Aborted,
}

impl OrchestrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::AwaitingConsultation => "awaiting_consultation",
            Self::Terminated => "terminated",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "running" => Some(Self::Running),
            "awaiting_consultation" => Some(Self::AwaitingConsultation),
            "terminated" => Some(Self::Terminated),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Aborted)
    }
}

/// The mutable core record of one orchestration.
///
/// All mutation goes through the methods below, each of which checks the
/// status it requires before touching any field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct OrchestrationState {
    current_schedule: Schedule,
    current_process: Process,
    visited_schedules: BTreeSet<Schedule>,
    flow_code: FlowCodeLog,
    status: OrchestrationStatus,
    pending_consultation: Option<ConsultationRequest>,
}

impl OrchestrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_schedule(&self) -> Schedule {
        self.current_schedule
    }

    pub fn current_process(&self) -> Process {
        self.current_process
    }

    pub fn position(&self) -> (Schedule, Process) {
        (self.current_schedule, self.current_process)
    }

    pub fn visited_schedules(&self) -> &BTreeSet<Schedule> {
        &self.visited_schedules
    }

    pub fn flow_code(&self) -> &FlowCodeLog {
        &self.flow_code
    }

    pub fn last_entry(&self) -> Option<&FlowCodeEntry> {
        self.flow_code.last()
    }

    pub fn status(&self) -> OrchestrationStatus {
        self.status
    }

    pub fn pending_consultation(&self) -> Option<&ConsultationRequest> {
        self.pending_consultation.as_ref()
    }

    /// `NotStarted -> Running`, entering `initial` at P1.
    pub fn begin(&mut self, initial: Schedule) -> Result<()> {
        self.require(OrchestrationStatus::NotStarted, "start")?;
        self.status = OrchestrationStatus::Running;
        self.flow_code
            .append(self.status, initial, Process::P1)
            .map(|_| ())?;
        self.current_schedule = initial;
        self.current_process = Process::P1;
        self.visited_schedules.insert(initial);
        Ok(())
    }

    /// Move to `process` inside the current schedule.
    ///
    /// Adjacency is not checked here; callers validate navigation first.
    pub fn move_to(&mut self, process: Process) -> Result<()> {
        self.flow_code
            .append(self.status, self.current_schedule, process)?;
        self.current_process = process;
        self.visited_schedules.insert(self.current_schedule);
        Ok(())
    }

    /// Enter `schedule` at P1.
    pub fn enter_schedule(&mut self, schedule: Schedule) -> Result<()> {
        self.flow_code.append(self.status, schedule, Process::P1)?;
        self.current_schedule = schedule;
        self.current_process = Process::P1;
        self.visited_schedules.insert(schedule);
        Ok(())
    }

    /// `Running -> AwaitingConsultation`.
    pub fn raise_consultation(&mut self, request: ConsultationRequest) -> Result<()> {
        self.require(OrchestrationStatus::Running, "raise a consultation")?;
        self.pending_consultation = Some(request);
        self.status = OrchestrationStatus::AwaitingConsultation;
        Ok(())
    }

    /// `AwaitingConsultation -> Running`, clearing the pending request.
    pub fn resolve_consultation(&mut self) -> Result<ConsultationRequest> {
        self.require(
            OrchestrationStatus::AwaitingConsultation,
            "resolve a consultation",
        )?;
        let request = self.pending_consultation.take().ok_or_else(|| {
            CoreError::InvalidState("awaiting consultation with no pending request".to_string())
        })?;
        self.status = OrchestrationStatus::Running;
        Ok(request)
    }

    /// `Running -> Terminated`. Termination preconditions are checked by the caller.
    pub fn terminate(&mut self) -> Result<()> {
        self.require(OrchestrationStatus::Running, "terminate")?;
        self.status = OrchestrationStatus::Terminated;
        Ok(())
    }

    /// Any non-terminal status `-> Aborted`. Any pending consultation is dropped.
    pub fn abort(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "cannot abort while {}",
                self.status.as_str()
            )));
        }
        self.pending_consultation = None;
        self.status = OrchestrationStatus::Aborted;
        Ok(())
    }

    /// Check the structural invariants of a state obtained from outside,
    /// e.g. a persisted snapshot.
    pub fn validate(&self) -> Result<()> {
        if self.status == OrchestrationStatus::NotStarted {
            if !self.flow_code.is_empty() || !self.visited_schedules.is_empty() {
                return Err(CoreError::Validation(
                    "a state that has not started must have an empty flow code".to_string(),
                ));
            }
            return Ok(());
        }

        let last = self.flow_code.last().ok_or_else(|| {
            CoreError::Validation("a started state must have at least one flow code entry".into())
        })?;
        if last.position() != self.position() {
            return Err(CoreError::Validation(format!(
                "current position {}/{} does not match last flow code entry {}/{}",
                self.current_schedule, self.current_process, last.schedule, last.process
            )));
        }

        let logged: BTreeSet<Schedule> =
            self.flow_code.entries().iter().map(|e| e.schedule).collect();
        if logged != self.visited_schedules {
            return Err(CoreError::Validation(
                "visited schedules do not match the flow code".to_string(),
            ));
        }

        match (self.status, &self.pending_consultation) {
            (OrchestrationStatus::AwaitingConsultation, None) => Err(CoreError::Validation(
                "awaiting consultation without a pending request".to_string(),
            )),
            (OrchestrationStatus::AwaitingConsultation, Some(_)) => Ok(()),
            (_, Some(_)) => Err(CoreError::Validation(format!(
                "pending consultation present while {}",
                self.status.as_str()
            ))),
            (OrchestrationStatus::Terminated, None)
                if self.visited_schedules.len() != Schedule::ALL.len()
                    || last.position() != (Schedule::Production, Process::P3) =>
            {
                Err(CoreError::Validation(
                    "terminated before visiting every schedule and finishing at production P3".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn require(&self, expected: OrchestrationStatus, action: &str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidState(format!(
                "cannot {action} while {} (expected {})",
                self.status.as_str(),
                expected.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::consultation::ConsultationKind;

    #[test]
    fn test_begin_enters_initial_schedule() {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Knowledge).unwrap();

        assert_eq!(state.status(), OrchestrationStatus::Running);
        assert_eq!(state.position(), (Schedule::Knowledge, Process::P1));
        assert!(state.visited_schedules().contains(&Schedule::Knowledge));
        assert_eq!(state.flow_code().encode(), "S1P1");
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Plan).unwrap();
        assert!(matches!(
            state.begin(Schedule::Plan),
            Err(CoreError::InvalidState(_))
        ));
        assert_eq!(state.flow_code().len(), 1);
    }

    #[test]
    fn test_consultation_lifecycle() {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Knowledge).unwrap();

        let request = ConsultationRequest::new(
            ConsultationKind::Optional,
            "Which data source?",
            60,
            state.position(),
        );
        state.raise_consultation(request.clone()).unwrap();
        assert_eq!(state.status(), OrchestrationStatus::AwaitingConsultation);
        assert!(state.validate().is_ok());

        // No transitions while waiting
        assert!(state.move_to(Process::P2).is_err());
        assert_eq!(state.flow_code().len(), 1);

        let resolved = state.resolve_consultation().unwrap();
        assert_eq!(resolved, request);
        assert_eq!(state.status(), OrchestrationStatus::Running);
        assert!(state.pending_consultation().is_none());
    }

    #[test]
    fn test_abort_clears_pending_consultation() {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Scale).unwrap();
        state
            .raise_consultation(ConsultationRequest::new(
                ConsultationKind::Mandatory,
                "Proceed?",
                10,
                state.position(),
            ))
            .unwrap();

        state.abort().unwrap();
        assert_eq!(state.status(), OrchestrationStatus::Aborted);
        assert!(state.pending_consultation().is_none());
        assert!(state.abort().is_err());
    }

    #[test]
    fn test_validate_detects_inconsistent_terminated_state() {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Production).unwrap();
        state.move_to(Process::P2).unwrap();
        state.move_to(Process::P3).unwrap();
        state.terminate().unwrap();

        assert!(matches!(state.validate(), Err(CoreError::Validation(_))));
    }

    fn all_schedules_up_to(last: Process) -> OrchestrationState {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Knowledge).unwrap();
        for schedule in [Schedule::Plan, Schedule::Implement, Schedule::Scale] {
            state.enter_schedule(schedule).unwrap();
        }
        state.enter_schedule(Schedule::Production).unwrap();
        state.move_to(Process::P2).unwrap();
        if last == Process::P3 {
            state.move_to(Process::P3).unwrap();
        }
        state.terminate().unwrap();
        state
    }

    #[test]
    fn test_validate_requires_termination_at_production_p3() {
        let early = all_schedules_up_to(Process::P2);
        assert!(matches!(early.validate(), Err(CoreError::Validation(_))));

        let complete = all_schedules_up_to(Process::P3);
        assert!(complete.validate().is_ok());
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut state = OrchestrationState::new();
        state.begin(Schedule::Knowledge).unwrap();
        state.move_to(Process::P2).unwrap();
        state.enter_schedule(Schedule::Implement).unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let restored: OrchestrationState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
        assert!(restored.validate().is_ok());
    }
}
