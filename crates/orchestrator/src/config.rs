use flow_core::{ConsultationKind, Process, Schedule};
use serde::{Deserialize, Serialize};

pub const OPTIONAL_FALLBACK: &str = "assume_best_practice";
pub const MANDATORY_FALLBACK: &str = "assume_approval";

/// Timeouts and fallback answers for human consultations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsultationConfig {
    /// Used when an executor asks for a consultation with a zero timeout
    pub default_timeout_seconds: u64,
    /// Upper bound applied to every requested timeout
    pub max_timeout_seconds: u64,
    pub optional_fallback: String,
    pub mandatory_fallback: String,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 60,
            max_timeout_seconds: 3600,
            optional_fallback: OPTIONAL_FALLBACK.to_string(),
            mandatory_fallback: MANDATORY_FALLBACK.to_string(),
        }
    }
}

impl ConsultationConfig {
    pub fn fallback_for(&self, kind: ConsultationKind) -> &str {
        match kind {
            ConsultationKind::Optional => &self.optional_fallback,
            ConsultationKind::Mandatory => &self.mandatory_fallback,
        }
    }

    pub fn effective_timeout(&self, requested_seconds: u64) -> u64 {
        let requested = if requested_seconds == 0 {
            self.default_timeout_seconds
        } else {
            requested_seconds
        };
        requested.min(self.max_timeout_seconds)
    }

    pub fn with_timeouts(mut self, default_seconds: u64, max_seconds: u64) -> Self {
        self.default_timeout_seconds = default_seconds;
        self.max_timeout_seconds = max_seconds;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether the selector may re-enter a schedule that was already visited.
    /// Without revisits, a run that visits production before the other
    /// schedules can never finish at production P3.
    pub allow_revisit: bool,
    /// Consecutive consultations one executor call may chain within a step
    pub max_consultations_per_step: u32,
    /// Retries of a recoverable step error in `run_to_completion`
    pub max_step_retries: u32,
    /// Step budget for `run_to_completion`
    pub max_steps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_revisit: true,
            max_consultations_per_step: 3,
            max_step_retries: 2,
            max_steps: 500,
        }
    }
}

impl EngineConfig {
    pub fn with_revisit(mut self, allow: bool) -> Self {
        self.allow_revisit = allow;
        self
    }

    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_max_step_retries(mut self, max: u32) -> Self {
        self.max_step_retries = max;
        self
    }
}

/// A point at which the linear executor asks for human input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsultationPoint {
    pub schedule: Schedule,
    pub process: Process,
    #[serde(default)]
    pub kind: ConsultationKind,
    pub prompt: String,
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// Settings for a `phaseflow run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub initial_schedule: Schedule,
    pub consultation_points: Vec<ConsultationPoint>,
}

/// Top-level configuration, read from `.phaseflow/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub engine: EngineConfig,
    pub consultation: ConsultationConfig,
    pub run: RunConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert!(config.engine.allow_revisit);
        assert_eq!(config.consultation.default_timeout_seconds, 60);
        assert_eq!(
            config.consultation.fallback_for(ConsultationKind::Optional),
            "assume_best_practice"
        );
        assert_eq!(
            config.consultation.fallback_for(ConsultationKind::Mandatory),
            "assume_approval"
        );
        assert_eq!(config.run.initial_schedule, Schedule::Knowledge);
    }

    #[test]
    fn test_effective_timeout() {
        let config = ConsultationConfig::default().with_timeouts(30, 90);
        assert_eq!(config.effective_timeout(0), 30);
        assert_eq!(config.effective_timeout(45), 45);
        assert_eq!(config.effective_timeout(600), 90);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"engine":{"allow_revisit":false},"run":{"consultation_points":[{"schedule":"plan","process":"P2","prompt":"Pick a stack"}]}}"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();

        assert!(!config.engine.allow_revisit);
        assert_eq!(config.engine.max_consultations_per_step, 3);
        assert_eq!(config.consultation, ConsultationConfig::default());

        let point = &config.run.consultation_points[0];
        assert_eq!(point.schedule, Schedule::Plan);
        assert_eq!(point.process, Process::P2);
        assert_eq!(point.kind, ConsultationKind::Optional);
        assert_eq!(point.timeout_seconds, 0);
    }
}
