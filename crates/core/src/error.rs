use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Malformed flow code {input:?} at offset {offset}: {reason}")]
    MalformedFlowCode {
        input: String,
        offset: usize,
        reason: String,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn malformed(input: &str, offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedFlowCode {
            input: input.to_string(),
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
