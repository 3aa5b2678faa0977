//! The orchestration state machine.
//!
//! ```text
//! NotStarted -> Running -> {AwaitingConsultation <-> Running} -> {Terminated | Aborted}
//! ```
//!
//! Each [`OrchestrationEngine::step`] either commits one transition together
//! with its flow-code entry or leaves the state untouched. `step` takes
//! `&mut self`, so at most one call is in flight per engine; other tasks
//! interact only through an [`AbortHandle`] or a [`ConsultationResponder`].

use events::{Event, EventBus, StateView};
use flow_core::{
    ConsultationOutcome, ConsultationRequest, OrchestrationState, OrchestrationStatus, Process,
    Schedule,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    ExecutionContext, ExecutorDirective, ProcessExecutor, ScheduleSelector, SelectorDecision,
};
use crate::config::{ConsultationConfig, EngineConfig};
use crate::consultation::{ConsultationGate, ConsultationResponder};
use crate::error::{Collaborator, OrchestratorError, Result};
use crate::navigation::{NavigationTarget, ProcessNavigator};
use crate::session_binding::{SessionBinding, SessionSnapshot};
use crate::termination::TerminationChecker;

/// What a successful `step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Moved to another process inside the current schedule.
    Advanced { schedule: Schedule, process: Process },
    /// Left the previous schedule and entered `schedule` at P1.
    EnteredSchedule {
        schedule: Schedule,
        termination_rejected: bool,
    },
    Terminated,
    Aborted,
}

/// Summary returned by [`OrchestrationEngine::run_to_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: OrchestrationStatus,
    pub steps: u32,
    pub flow_code: String,
}

/// Cancels the engine's in-flight or next step from another task.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct OrchestrationEngine {
    session_id: Uuid,
    state: OrchestrationState,
    revision: u64,
    config: EngineConfig,
    executor: Arc<dyn ProcessExecutor>,
    selector: Arc<dyn ScheduleSelector>,
    gate: ConsultationGate,
    event_bus: Option<EventBus>,
    binding: Option<SessionBinding>,
    cancel: CancellationToken,
}

impl OrchestrationEngine {
    pub fn new(executor: Arc<dyn ProcessExecutor>, selector: Arc<dyn ScheduleSelector>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: OrchestrationState::new(),
            revision: 0,
            config: EngineConfig::default(),
            executor,
            selector,
            gate: ConsultationGate::new(ConsultationConfig::default()),
            event_bus: None,
            binding: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Rebuild an engine from a persisted snapshot.
    ///
    /// A pending consultation in the snapshot is raised again by the next `step`.
    pub fn resume(
        snapshot: SessionSnapshot,
        executor: Arc<dyn ProcessExecutor>,
        selector: Arc<dyn ScheduleSelector>,
    ) -> Result<Self> {
        let state = SessionBinding::restore(&snapshot)?;
        info!(
            session_id = %snapshot.session_id,
            revision = snapshot.revision,
            status = state.status().as_str(),
            flow_code = %state.flow_code().encode(),
            "Resuming orchestration"
        );

        let mut engine = Self::new(executor, selector);
        engine.session_id = snapshot.session_id;
        engine.revision = snapshot.revision;
        engine.state = state;
        Ok(engine)
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_consultation_config(mut self, config: ConsultationConfig) -> Self {
        self.gate = ConsultationGate::new(config);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_binding(mut self, binding: SessionBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn current_state(&self) -> &OrchestrationState {
        &self.state
    }

    pub fn flow_code(&self) -> String {
        self.state.flow_code().encode()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn responder(&self) -> ConsultationResponder {
        self.gate.responder()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionBinding::snapshot(self.session_id, self.revision, &self.state)
    }

    /// Enter `initial` at P1 and start running.
    pub async fn start(&mut self, initial: Schedule) -> Result<()> {
        match self.state.status() {
            OrchestrationStatus::NotStarted => {}
            status if status.is_terminal() => {
                return Err(OrchestratorError::EngineClosed { status })
            }
            status => {
                return Err(OrchestratorError::InvalidState(format!(
                    "cannot start an orchestration that is already {}",
                    status.as_str()
                )))
            }
        }

        self.state.begin(initial)?;
        info!(
            session_id = %self.session_id,
            schedule = %initial,
            "Orchestration started"
        );
        self.commit().await;
        Ok(())
    }

    /// Drive the orchestration forward by one transition.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        self.ensure_steppable()?;

        if self.cancel.is_cancelled() {
            return self.abort_in_step("abort requested").await;
        }

        let mut consultation: Option<ConsultationOutcome> = None;
        let restored = self.state.pending_consultation().cloned();

        if let Some(request) = &restored {
            debug!(session_id = %self.session_id, "Re-raising restored consultation");
            self.emit(Event::ConsultationRaised {
                session_id: self.session_id,
                request: request.clone(),
            });
            match self.await_consultation(request).await? {
                Some(outcome) => consultation = Some(outcome),
                None => return Ok(StepOutcome::Aborted),
            }
        }

        let result = self.execute_step(consultation).await;
        if let (Err(e), Some(request)) = (&result, restored) {
            // A failed step leaves the restored consultation pending again
            if self.state.status() == OrchestrationStatus::Running {
                debug!(session_id = %self.session_id, error = %e, "Reinstating restored consultation");
                self.state.raise_consultation(request)?;
                self.commit().await;
            }
        }
        result
    }

    /// Call the executor for the current position and apply its directive.
    async fn execute_step(
        &mut self,
        mut consultation: Option<ConsultationOutcome>,
    ) -> Result<StepOutcome> {
        let position = self.state.position();
        let mut consultations = 0u32;
        let directive = loop {
            let context = ExecutionContext {
                session_id: self.session_id,
                schedule: position.0,
                process: position.1,
                consultation: consultation.take(),
            };

            let executor = Arc::clone(&self.executor);
            let cancel = self.cancel.clone();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = executor.execute(&context) => Some(result),
            };
            let Some(result) = result else {
                return self.abort_in_step("aborted during process execution").await;
            };

            match result {
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        schedule = %position.0,
                        process = %position.1,
                        error = %e,
                        "Executor failed"
                    );
                    return Err(OrchestratorError::step(
                        Collaborator::Executor,
                        position,
                        e.message,
                    ));
                }
                Ok(ExecutorDirective::ConsultationNeeded {
                    prompt,
                    kind,
                    timeout_seconds,
                }) => {
                    consultations += 1;
                    if consultations > self.config.max_consultations_per_step {
                        return Err(OrchestratorError::step(
                            Collaborator::Executor,
                            position,
                            format!(
                                "more than {} consultations requested in one step",
                                self.config.max_consultations_per_step
                            ),
                        ));
                    }

                    let request = self.gate.prepare(kind, prompt, timeout_seconds, position);
                    self.state.raise_consultation(request.clone())?;
                    info!(
                        session_id = %self.session_id,
                        kind = kind.as_str(),
                        schedule = %position.0,
                        process = %position.1,
                        "Consultation raised"
                    );
                    self.commit().await;
                    self.emit(Event::ConsultationRaised {
                        session_id: self.session_id,
                        request: request.clone(),
                    });

                    match self.await_consultation(&request).await? {
                        Some(outcome) => consultation = Some(outcome),
                        None => return Ok(StepOutcome::Aborted),
                    }
                }
                Ok(directive) => break directive,
            }
        };

        match directive {
            ExecutorDirective::Advance { next } => self.advance(next).await,
            ExecutorDirective::ExitToSelection => self.exit_schedule().await,
            ExecutorDirective::ConsultationNeeded { .. } => Err(OrchestratorError::InvalidState(
                "consultation directive escaped the consultation loop".to_string(),
            )),
        }
    }

    /// Step until the orchestration is terminal or `max_steps` is spent.
    ///
    /// Recoverable step errors are retried up to `max_step_retries` times in
    /// a row; any other error is returned immediately.
    pub async fn run_to_completion(&mut self) -> Result<RunSummary> {
        let mut steps = 0u32;
        let mut retries = 0u32;

        while !self.state.status().is_terminal() && steps < self.config.max_steps {
            match self.step().await {
                Ok(outcome) => {
                    steps += 1;
                    retries = 0;
                    debug!(session_id = %self.session_id, outcome = ?outcome, "Step completed");
                }
                Err(e) if e.is_recoverable() && retries < self.config.max_step_retries => {
                    retries += 1;
                    warn!(
                        session_id = %self.session_id,
                        attempt = retries,
                        error = %e,
                        "Retrying failed step"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if !self.state.status().is_terminal() {
            warn!(
                session_id = %self.session_id,
                steps,
                "Step budget exhausted before termination"
            );
        }

        Ok(RunSummary {
            status: self.state.status(),
            steps,
            flow_code: self.flow_code(),
        })
    }

    /// Abort the orchestration. Fails if it is already terminal.
    pub async fn abort(&mut self, reason: impl Into<String>) -> Result<()> {
        let status = self.state.status();
        if status.is_terminal() {
            return Err(OrchestratorError::EngineClosed { status });
        }
        self.cancel.cancel();
        self.mark_aborted(reason.into()).await
    }

    async fn advance(&mut self, next: Process) -> Result<StepOutcome> {
        let from = self.state.current_process();
        ProcessNavigator::validate(from, NavigationTarget::Process(next))?;

        self.state.move_to(next)?;
        debug!(
            session_id = %self.session_id,
            schedule = %self.state.current_schedule(),
            from = %from,
            to = %next,
            "Process transition"
        );
        self.commit().await;

        Ok(StepOutcome::Advanced {
            schedule: self.state.current_schedule(),
            process: next,
        })
    }

    async fn exit_schedule(&mut self) -> Result<StepOutcome> {
        let from = self.state.current_process();
        ProcessNavigator::validate(from, NavigationTarget::ExitSchedule)?;

        let Some(decision) = self.select(false).await? else {
            return self.abort_in_step("aborted during schedule selection").await;
        };

        match decision {
            SelectorDecision::Enter(schedule) => self.enter(schedule, false).await,
            SelectorDecision::AttemptTerminate if TerminationChecker::can_terminate(&self.state) => {
                self.state.terminate()?;
                info!(
                    session_id = %self.session_id,
                    flow_code = %self.flow_code(),
                    "Orchestration terminated"
                );
                self.commit().await;
                self.emit(Event::Terminated {
                    session_id: self.session_id,
                    flow_code: self.flow_code(),
                });
                Ok(StepOutcome::Terminated)
            }
            SelectorDecision::AttemptTerminate => {
                let missing = TerminationChecker::missing_schedules(&self.state);
                warn!(
                    session_id = %self.session_id,
                    missing = ?missing,
                    "Termination rejected, not all schedules complete"
                );
                self.emit(Event::TerminationRejected {
                    session_id: self.session_id,
                    missing,
                    last_position: self.state.last_entry().map(|e| e.position()),
                });

                let Some(decision) = self.select(true).await? else {
                    return self.abort_in_step("aborted during schedule selection").await;
                };
                match decision {
                    SelectorDecision::Enter(schedule) => self.enter(schedule, true).await,
                    SelectorDecision::AttemptTerminate => Err(OrchestratorError::step(
                        Collaborator::Selector,
                        self.state.position(),
                        "selector attempted termination again after it was rejected",
                    )),
                }
            }
        }
    }

    async fn enter(&mut self, schedule: Schedule, termination_rejected: bool) -> Result<StepOutcome> {
        if !self.config.allow_revisit && self.state.visited_schedules().contains(&schedule) {
            return Err(OrchestratorError::step(
                Collaborator::Selector,
                self.state.position(),
                format!("schedule {schedule} was already visited and revisits are disabled"),
            ));
        }

        self.state.enter_schedule(schedule)?;
        info!(
            session_id = %self.session_id,
            schedule = %schedule,
            "Entered schedule"
        );
        self.commit().await;

        Ok(StepOutcome::EnteredSchedule {
            schedule,
            termination_rejected,
        })
    }

    /// Ask the selector, racing it against cancellation. `None` means cancelled.
    async fn select(&self, termination_rejected: bool) -> Result<Option<SelectorDecision>> {
        let selector = Arc::clone(&self.selector);
        let cancel = self.cancel.clone();
        let visited = self.state.visited_schedules().clone();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = selector.select_next(&visited, termination_rejected) => result,
        };

        result.map(Some).map_err(|e| {
            warn!(session_id = %self.session_id, error = %e, "Selector failed");
            OrchestratorError::step(Collaborator::Selector, self.state.position(), e.message)
        })
    }

    /// Wait on the gate for `request`, which must already be pending in the
    /// state. `None` means the session was aborted while waiting.
    async fn await_consultation(
        &mut self,
        request: &ConsultationRequest,
    ) -> Result<Option<ConsultationOutcome>> {
        let cancel = self.cancel.clone();
        let resolution = self.gate.wait(request, &cancel).await;

        if resolution.mandatory_timed_out {
            self.emit(Event::ConsultationTimedOutMandatory {
                session_id: self.session_id,
                prompt: request.prompt.clone(),
                raised_at: request.raised_at,
                fallback: resolution.outcome.answer().unwrap_or_default().to_string(),
            });
        }
        self.emit(Event::ConsultationResolved {
            session_id: self.session_id,
            outcome: resolution.outcome.clone(),
        });

        if resolution.outcome == ConsultationOutcome::Cancelled {
            self.mark_aborted("cancelled while awaiting consultation".to_string())
                .await?;
            return Ok(None);
        }

        self.state.resolve_consultation()?;
        self.commit().await;
        Ok(Some(resolution.outcome))
    }

    async fn abort_in_step(&mut self, reason: &str) -> Result<StepOutcome> {
        self.mark_aborted(reason.to_string()).await?;
        Ok(StepOutcome::Aborted)
    }

    async fn mark_aborted(&mut self, reason: String) -> Result<()> {
        self.state.abort()?;
        warn!(session_id = %self.session_id, reason = %reason, "Orchestration aborted");
        self.commit().await;
        self.emit(Event::Aborted {
            session_id: self.session_id,
            reason,
        });
        Ok(())
    }

    fn ensure_steppable(&self) -> Result<()> {
        match self.state.status() {
            status if status.is_terminal() => Err(OrchestratorError::EngineClosed { status }),
            OrchestrationStatus::NotStarted => Err(OrchestratorError::InvalidState(
                "step called before start".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Bump the revision, publish the new state and checkpoint it.
    async fn commit(&mut self) {
        self.revision += 1;
        self.emit(Event::StateChanged {
            session_id: self.session_id,
            state: StateView::capture(&self.state, self.revision),
        });

        if let Some(binding) = &self.binding {
            let snapshot = SessionBinding::snapshot(self.session_id, self.revision, &self.state);
            if let Err(e) = binding.checkpoint(&snapshot).await {
                warn!(
                    session_id = %self.session_id,
                    revision = self.revision,
                    error = %e,
                    "Failed to checkpoint orchestration state"
                );
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
