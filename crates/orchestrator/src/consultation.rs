//! Human-consultation gate.
//!
//! A consultation blocks the current step until a human answers through a
//! [`ConsultationResponder`], the timeout elapses, or the session is
//! cancelled. Timeouts never fail: the configured fallback answer is
//! substituted instead.

use flow_core::{ConsultationKind, ConsultationOutcome, ConsultationRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConsultationConfig;

type ResponseSlot = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Result of one gate wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResolution {
    pub outcome: ConsultationOutcome,
    /// Set when a mandatory consultation fell back after its timeout.
    pub mandatory_timed_out: bool,
}

pub struct ConsultationGate {
    config: ConsultationConfig,
    slot: ResponseSlot,
}

impl ConsultationGate {
    pub fn new(config: ConsultationConfig) -> Self {
        Self {
            config,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ConsultationConfig {
        &self.config
    }

    /// Handle through which a human answers the outstanding request.
    pub fn responder(&self) -> ConsultationResponder {
        ConsultationResponder {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Build a request with the configured timeout policy applied.
    pub fn prepare(
        &self,
        kind: ConsultationKind,
        prompt: impl Into<String>,
        timeout_seconds: u64,
        raised_at: (flow_core::Schedule, flow_core::Process),
    ) -> ConsultationRequest {
        ConsultationRequest::new(
            kind,
            prompt,
            self.config.effective_timeout(timeout_seconds),
            raised_at,
        )
    }

    /// Wait for a human response to `request`.
    ///
    /// Cancellation wins over a response or timeout arriving at the same time.
    pub async fn wait(
        &self,
        request: &ConsultationRequest,
        cancel: &CancellationToken,
    ) -> GateResolution {
        let (tx, rx) = oneshot::channel();
        self.install(tx);

        info!(
            kind = request.kind.as_str(),
            timeout_seconds = request.timeout_seconds,
            schedule = %request.raised_at.0,
            process = %request.raised_at.1,
            "Waiting for consultation response"
        );

        let timeout = tokio::time::sleep(Duration::from_secs(request.timeout_seconds));

        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Consultation cancelled");
                GateResolution {
                    outcome: ConsultationOutcome::Cancelled,
                    mandatory_timed_out: false,
                }
            }
            answer = rx => match answer {
                Ok(text) => {
                    debug!(answer_length = text.len(), "Consultation answered");
                    GateResolution {
                        outcome: ConsultationOutcome::Answered(text),
                        mandatory_timed_out: false,
                    }
                }
                // Responder slot was replaced; treat like a timeout
                Err(_) => self.fallback(request),
            },
            _ = timeout => self.fallback(request),
        };

        self.clear();
        resolution
    }

    /// One-shot convenience combining `prepare` and `wait`.
    pub async fn request(
        &self,
        kind: ConsultationKind,
        prompt: impl Into<String>,
        timeout_seconds: u64,
        raised_at: (flow_core::Schedule, flow_core::Process),
        cancel: &CancellationToken,
    ) -> GateResolution {
        let request = self.prepare(kind, prompt, timeout_seconds, raised_at);
        self.wait(&request, cancel).await
    }

    fn fallback(&self, request: &ConsultationRequest) -> GateResolution {
        let fallback = self.config.fallback_for(request.kind).to_string();
        let mandatory_timed_out = request.kind == ConsultationKind::Mandatory;
        if mandatory_timed_out {
            warn!(
                prompt = %request.prompt,
                fallback = %fallback,
                "Mandatory consultation timed out, applying fallback"
            );
        } else {
            info!(fallback = %fallback, "Optional consultation timed out, applying fallback");
        }
        GateResolution {
            outcome: ConsultationOutcome::FallbackApplied(fallback),
            mandatory_timed_out,
        }
    }

    fn install(&self, tx: oneshot::Sender<String>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(tx);
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }
}

/// Cloneable handle for answering consultations from another task.
#[derive(Clone)]
pub struct ConsultationResponder {
    slot: ResponseSlot,
}

impl ConsultationResponder {
    /// Deliver an answer. Returns `false` if no consultation was waiting.
    pub fn respond(&self, answer: impl Into<String>) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(answer.into()).is_ok(),
            None => false,
        }
    }

    /// Whether a consultation is currently waiting for an answer.
    pub fn is_waiting(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}
