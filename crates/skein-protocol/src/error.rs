//! Error types shared by every skein crate.

use thiserror::Error;

/// Errors that can surface from ports, the event stream engine, or stores.
#[derive(Debug, Error)]
pub enum SkeinError {
    #[error("agent not found: {0}")]
    UnknownAgent(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("api error {code}: {message}")]
    Api { code: String, message: String },
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("checkpoint conflict: expected version {expected}, got {actual}")]
    CheckpointConflict { expected: u64, actual: u64 },
    #[error("memory error: {0}")]
    Memory(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SkeinError {
    /// Stable machine-readable code, used for `Error` events and wire chunks.
    pub fn code(&self) -> &str {
        match self {
            Self::UnknownAgent(_) => "UnknownAgent",
            Self::ToolNotFound(_) => "ToolNotFound",
            Self::InvalidArguments(_) => "InvalidParameter",
            Self::Provider(_) => "ProviderError",
            Self::Api { code, .. } => code,
            Self::Checkpoint(_) => "CheckpointError",
            Self::CheckpointConflict { .. } => "CheckpointConflict",
            Self::Memory(_) => "MemoryError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
            Self::InvalidState(_) => "InvalidState",
            Self::Unsupported(_) => "Unsupported",
        }
    }
}

impl From<serde_json::Error> for SkeinError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SkeinError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Convenience result type for port and engine operations.
pub type SkeinResult<T> = Result<T, SkeinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_code_is_passed_through() {
        let error = SkeinError::Api {
            code: "RateLimitExceeded".to_owned(),
            message: "slow down".to_owned(),
        };
        assert_eq!(error.code(), "RateLimitExceeded");
        assert_eq!(error.to_string(), "api error RateLimitExceeded: slow down");
    }

    #[test]
    fn conflict_message_names_both_versions() {
        let error = SkeinError::CheckpointConflict {
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            error.to_string(),
            "checkpoint conflict: expected version 3, got 2"
        );
    }
}
