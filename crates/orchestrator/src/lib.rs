pub mod collaborators;
pub mod config;
pub mod consultation;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod session_binding;
pub mod store;
pub mod strategies;
pub mod termination;

pub use collaborators::{
    CollaboratorError, ExecutionContext, ExecutorDirective, ProcessExecutor, ScheduleSelector,
    SelectorDecision,
};
pub use config::{ConsultationConfig, ConsultationPoint, EngineConfig, OrchestratorConfig};
pub use consultation::{ConsultationGate, ConsultationResponder, GateResolution};
pub use engine::{AbortHandle, OrchestrationEngine, RunSummary, StepOutcome};
pub use error::{Collaborator, OrchestratorError, Result};
pub use navigation::{NavigationTarget, ProcessNavigator};
pub use session_binding::{SessionBinding, SessionSnapshot, SessionStore};
pub use termination::TerminationChecker;
