//! Common error types for the detonation orchestrator

use thiserror::Error;

/// Coarse classification of an [`OrchestratorError`].
///
/// Callers use the kind to decide policy: e.g. a `Timeout` while waiting for the
/// environment means "never got there", a `Transport` means "couldn't ask".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Application,
    Timeout,
    Configuration,
    Validation,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Application => "application",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Peer unreachable or the connection failed mid-request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer was reached but reported a logical failure.
    #[error("Application error: {0}")]
    Application(String),

    /// The environment has no restorable snapshot.
    #[error("No snapshots found: {0}")]
    NoSnapshots(String),

    /// A deadline elapsed before the target state or response was observed.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Transport(_) => ErrorKind::Transport,
            OrchestratorError::Application(_) | OrchestratorError::NoSnapshots(_) => {
                ErrorKind::Application
            }
            OrchestratorError::Timeout(_) => ErrorKind::Timeout,
            OrchestratorError::Configuration(_) => ErrorKind::Configuration,
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::Storage(_) => ErrorKind::Storage,
            OrchestratorError::Serialization(_) | OrchestratorError::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrchestratorError::Timeout(err.to_string())
        } else if err.is_decode() {
            OrchestratorError::Application(format!("malformed response body: {}", err))
        } else if err.is_builder() {
            OrchestratorError::Configuration(err.to_string())
        } else {
            OrchestratorError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
