use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Security violation: {construct} is not allowed in challenge code")]
    SecurityViolation { construct: String },

    #[error("Syntax error in player code: {0}")]
    Syntax(String),

    #[error("{0}")]
    Runtime(String),

    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge { max: usize, actual: usize },

    #[error("Another execution is already in flight for this editor")]
    Busy,

    #[error("Challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("Invalid challenge definition: {0}")]
    InvalidChallenge(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid attempt transition: {0}")]
    InvalidTransition(String),

    /// Player code tampered with what the harness reads back.
    #[error("Could not read back sandbox state: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Stable tag for the kind of failure, rendered to the editor alongside the message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SecurityViolation,
    Syntax,
    Runtime,
    Timeout,
    ResourceLimit,
    CodeTooLarge,
    Busy,
    NotFound,
    InvalidInput,
    Internal,
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::SecurityViolation { .. } => ErrorKind::SecurityViolation,
            SandboxError::Syntax(_) => ErrorKind::Syntax,
            SandboxError::Runtime(_) | SandboxError::Capture(_) => ErrorKind::Runtime,
            SandboxError::Timeout { .. } => ErrorKind::Timeout,
            SandboxError::ResourceLimit(_) => ErrorKind::ResourceLimit,
            SandboxError::CodeTooLarge { .. } => ErrorKind::CodeTooLarge,
            SandboxError::Busy => ErrorKind::Busy,
            SandboxError::ChallengeNotFound(_) => ErrorKind::NotFound,
            SandboxError::InvalidChallenge(_)
            | SandboxError::InvalidConfig(_)
            | SandboxError::InvalidTransition(_) => ErrorKind::InvalidInput,
            SandboxError::IoError(_)
            | SandboxError::JsonError(_)
            | SandboxError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure came from the player's code rather than the host.
    pub fn is_player_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SecurityViolation
                | ErrorKind::Syntax
                | ErrorKind::Runtime
                | ErrorKind::Timeout
                | ErrorKind::ResourceLimit
                | ErrorKind::CodeTooLarge
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_displays_bare_message() {
        let err = SandboxError::Runtime("boom".to_string());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn timeout_is_distinct_from_runtime() {
        let err = SandboxError::Timeout { timeout_ms: 2000 };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("2000ms"));
        assert!(err.is_player_error());
    }

    #[test]
    fn unreadable_state_is_blamed_on_player() {
        let err = SandboxError::Capture("malformed envelope".to_string());
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.is_player_error());
    }

    #[test]
    fn host_errors_are_not_player_errors() {
        assert!(!SandboxError::Busy.is_player_error());
        assert!(!SandboxError::InternalError("x".into()).is_player_error());
    }
}
