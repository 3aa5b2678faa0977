use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{Process, Schedule};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ConsultationKind {
    #[default]
    Optional,
    Mandatory,
}

impl ConsultationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optional => "optional",
            Self::Mandatory => "mandatory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "optional" => Some(Self::Optional),
            "mandatory" => Some(Self::Mandatory),
            _ => None,
        }
    }
}

/// An outstanding request for human input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ConsultationRequest {
    pub kind: ConsultationKind,
    pub prompt: String,
    pub timeout_seconds: u64,
    pub raised_at: (Schedule, Process),
    pub raised_at_time: DateTime<Utc>,
}

impl ConsultationRequest {
    pub fn new(
        kind: ConsultationKind,
        prompt: impl Into<String>,
        timeout_seconds: u64,
        raised_at: (Schedule, Process),
    ) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            timeout_seconds,
            raised_at,
            raised_at_time: Utc::now(),
        }
    }
}

/// How a consultation was resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum ConsultationOutcome {
    /// A human answered before the timeout.
    Answered(String),
    /// The timeout elapsed and the policy fallback was substituted.
    FallbackApplied(String),
    /// The enclosing session was aborted while waiting.
    Cancelled,
}

impl ConsultationOutcome {
    /// The text the executor should act on, if any.
    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Answered(text) | Self::FallbackApplied(text) => Some(text),
            Self::Cancelled => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackApplied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = ConsultationRequest::new(
            ConsultationKind::Mandatory,
            "Approve the rollout plan?",
            120,
            (Schedule::Production, Process::P2),
        );
        assert_eq!(request.kind, ConsultationKind::Mandatory);
        assert_eq!(request.timeout_seconds, 120);
        assert_eq!(request.raised_at, (Schedule::Production, Process::P2));
    }

    #[test]
    fn test_outcome_answer() {
        assert_eq!(
            ConsultationOutcome::Answered("yes".into()).answer(),
            Some("yes")
        );
        assert_eq!(ConsultationOutcome::Cancelled.answer(), None);
        assert!(ConsultationOutcome::FallbackApplied("assume_approval".into()).is_fallback());
    }

    #[test]
    fn test_outcome_serialization() {
        let json =
            serde_json::to_string(&ConsultationOutcome::FallbackApplied("x".into())).unwrap();
        assert_eq!(json, r#"{"outcome":"fallback_applied","value":"x"}"#);
        assert_eq!(ConsultationKind::parse("mandatory"), Some(ConsultationKind::Mandatory));
    }
}
