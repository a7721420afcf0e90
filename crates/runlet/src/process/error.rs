//! Process manager error types.

use std::io;

use thiserror::Error;

/// Result type for process manager operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors returned by [`Manager`](super::Manager) operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command was empty or only whitespace.
    #[error("empty command")]
    InvalidCommand,

    /// The OS could not create the process.
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process identifier is not a well-formed UUID.
    #[error("invalid process id {0}")]
    InvalidId(String),

    /// No process with this identifier in the caller's registry.
    #[error("process id {0} does not exist")]
    NotFound(String),

    /// Signal delivery to the process failed.
    #[error("failed to kill process: {0}")]
    KillFailed(#[source] io::Error),
}

impl ProcessError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCommand => "INVALID_COMMAND",
            Self::SpawnFailed { .. } => "SPAWN_FAILED",
            Self::InvalidId(_) => "INVALID_ID",
            Self::NotFound(_) => "NOT_FOUND",
            Self::KillFailed(_) => "KILL_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_display() {
        assert_eq!(ProcessError::InvalidCommand.to_string(), "empty command");

        let err = ProcessError::SpawnFailed {
            program: "jadfadf".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("failed to spawn jadfadf: "));

        let err = ProcessError::NotFound("95bf5b81-74bc-47e7-8622-e2aace3e866f".to_string());
        assert_eq!(
            err.to_string(),
            "process id 95bf5b81-74bc-47e7-8622-e2aace3e866f does not exist"
        );
    }

    #[test]
    fn test_process_error_codes() {
        assert_eq!(ProcessError::InvalidCommand.code(), "INVALID_COMMAND");
        assert_eq!(ProcessError::InvalidId("x".into()).code(), "INVALID_ID");
        assert_eq!(ProcessError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(
            ProcessError::KillFailed(io::Error::other("gone")).code(),
            "KILL_FAILED"
        );
    }
}
