//! Concrete executor and selector strategies.
//!
//! - [`LinearExecutor`] walks P1 -> P2 -> P3 and exits, raising the
//!   configured consultation points on the way
//! - [`SequentialSelector`] enters unvisited schedules in ordinal order and
//!   attempts termination once all five are done
//! - [`ScriptedExecutor`] / [`ScriptedSelector`] replay recorded results

use async_trait::async_trait;
use flow_core::{Process, Schedule};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use tracing::debug;

use crate::collaborators::{
    CollaboratorError, ExecutionContext, ExecutorDirective, ProcessExecutor, ScheduleSelector,
    SelectorDecision,
};
use crate::config::ConsultationPoint;
use crate::navigation::ProcessNavigator;

type CollabResult<T> = std::result::Result<T, CollaboratorError>;

#[derive(Debug, Clone, Default)]
pub struct LinearExecutor {
    consultation_points: Vec<ConsultationPoint>,
}

impl LinearExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consultation_points(mut self, points: Vec<ConsultationPoint>) -> Self {
        self.consultation_points = points;
        self
    }

    fn point_for(&self, schedule: Schedule, process: Process) -> Option<&ConsultationPoint> {
        self.consultation_points
            .iter()
            .find(|p| p.schedule == schedule && p.process == process)
    }
}

#[async_trait]
impl ProcessExecutor for LinearExecutor {
    async fn execute(&self, context: &ExecutionContext) -> CollabResult<ExecutorDirective> {
        if context.consultation.is_none() {
            if let Some(point) = self.point_for(context.schedule, context.process) {
                return Ok(ExecutorDirective::ConsultationNeeded {
                    prompt: point.prompt.clone(),
                    kind: point.kind,
                    timeout_seconds: point.timeout_seconds,
                });
            }
        }

        let directive = match ProcessNavigator::next_process(context.process) {
            Some(next) => ExecutorDirective::Advance { next },
            None => ExecutorDirective::ExitToSelection,
        };
        debug!(
            schedule = %context.schedule,
            process = %context.process,
            directive = ?directive,
            "Linear executor decided"
        );
        Ok(directive)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SequentialSelector {
    allow_revisit: bool,
}

impl Default for SequentialSelector {
    fn default() -> Self {
        Self {
            allow_revisit: true,
        }
    }
}

impl SequentialSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the engine's `allow_revisit` setting.
    pub fn with_revisit(mut self, allow: bool) -> Self {
        self.allow_revisit = allow;
        self
    }
}

#[async_trait]
impl ScheduleSelector for SequentialSelector {
    async fn select_next(
        &self,
        visited: &BTreeSet<Schedule>,
        termination_rejected: bool,
    ) -> CollabResult<SelectorDecision> {
        let next_missing = Schedule::ALL.into_iter().find(|s| !visited.contains(s));

        match (next_missing, termination_rejected) {
            (Some(schedule), _) => Ok(SelectorDecision::Enter(schedule)),
            // Everything visited but termination refused: production was not last
            (None, true) if self.allow_revisit => Ok(SelectorDecision::Enter(Schedule::Production)),
            (None, true) => Err(CollaboratorError::new(
                "every schedule was visited but production did not finish last, \
                 and re-entering production is not allowed without revisits",
            )),
            (None, false) => Ok(SelectorDecision::AttemptTerminate),
        }
    }
}

/// Executor that replays a fixed list of results and records every call.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<CollabResult<ExecutorDirective>>>,
    calls: Mutex<Vec<ExecutionContext>>,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = CollabResult<ExecutorDirective>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn advancing(steps: impl IntoIterator<Item = Process>) -> Self {
        Self::new(
            steps
                .into_iter()
                .map(|next| Ok(ExecutorDirective::Advance { next })),
        )
    }

    pub fn calls(&self) -> Vec<ExecutionContext> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ProcessExecutor for ScriptedExecutor {
    async fn execute(&self, context: &ExecutionContext) -> CollabResult<ExecutorDirective> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(context.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Err(CollaboratorError::new("executor script exhausted")))
    }
}

/// Selector that replays a fixed list of results and records every call.
#[derive(Debug, Default)]
pub struct ScriptedSelector {
    script: Mutex<VecDeque<CollabResult<SelectorDecision>>>,
    calls: Mutex<Vec<(BTreeSet<Schedule>, bool)>>,
}

impl ScriptedSelector {
    pub fn new(script: impl IntoIterator<Item = CollabResult<SelectorDecision>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(BTreeSet<Schedule>, bool)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ScheduleSelector for ScriptedSelector {
    async fn select_next(
        &self,
        visited: &BTreeSet<Schedule>,
        termination_rejected: bool,
    ) -> CollabResult<SelectorDecision> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((visited.clone(), termination_rejected));
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Err(CollaboratorError::new("selector script exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::{ConsultationKind, ConsultationOutcome};
    use uuid::Uuid;

    fn ctx(schedule: Schedule, process: Process) -> ExecutionContext {
        ExecutionContext {
            session_id: Uuid::new_v4(),
            schedule,
            process,
            consultation: None,
        }
    }

    #[tokio::test]
    async fn test_linear_executor_walks_forward() {
        let executor = LinearExecutor::new();
        assert_eq!(
            executor.execute(&ctx(Schedule::Plan, Process::P1)).await,
            Ok(ExecutorDirective::Advance { next: Process::P2 })
        );
        assert_eq!(
            executor.execute(&ctx(Schedule::Plan, Process::P3)).await,
            Ok(ExecutorDirective::ExitToSelection)
        );
    }

    #[tokio::test]
    async fn test_linear_executor_consults_once() {
        let executor = LinearExecutor::new().with_consultation_points(vec![ConsultationPoint {
            schedule: Schedule::Plan,
            process: Process::P1,
            kind: ConsultationKind::Optional,
            prompt: "Pick a framework".to_string(),
            timeout_seconds: 60,
        }]);

        let mut context = ctx(Schedule::Plan, Process::P1);
        let first = executor.execute(&context).await.unwrap();
        assert!(matches!(first, ExecutorDirective::ConsultationNeeded { .. }));

        context.consultation = Some(ConsultationOutcome::FallbackApplied(
            "assume_best_practice".to_string(),
        ));
        let second = executor.execute(&context).await.unwrap();
        assert_eq!(second, ExecutorDirective::Advance { next: Process::P2 });
    }

    #[tokio::test]
    async fn test_sequential_selector() {
        let selector = SequentialSelector::new();
        let mut visited = BTreeSet::from([Schedule::Knowledge]);

        assert_eq!(
            selector.select_next(&visited, false).await,
            Ok(SelectorDecision::Enter(Schedule::Plan))
        );

        visited.extend(Schedule::ALL);
        assert_eq!(
            selector.select_next(&visited, false).await,
            Ok(SelectorDecision::AttemptTerminate)
        );
        assert_eq!(
            selector.select_next(&visited, true).await,
            Ok(SelectorDecision::Enter(Schedule::Production))
        );
    }

    #[tokio::test]
    async fn test_scripted_executor_records_and_exhausts() {
        let executor = ScriptedExecutor::advancing([Process::P2]);
        let context = ctx(Schedule::Scale, Process::P1);

        assert!(executor.execute(&context).await.is_ok());
        assert!(executor.execute(&context).await.is_err());
        assert_eq!(executor.calls().len(), 2);
        assert_eq!(executor.remaining(), 0);
    }

    #[tokio::test]
    async fn test_sequential_selector_dead_end_without_revisits() {
        let selector = SequentialSelector::new().with_revisit(false);
        let visited = BTreeSet::from(Schedule::ALL);

        assert_eq!(
            selector.select_next(&visited, false).await,
            Ok(SelectorDecision::AttemptTerminate)
        );
        let err = selector.select_next(&visited, true).await.unwrap_err();
        assert!(err.message.contains("revisits"));
    }
}
