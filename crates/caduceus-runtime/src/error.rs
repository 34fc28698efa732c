//! Run-level error taxonomy.

use std::time::Duration;
use thiserror::Error;

use caduceus_core::{CoreError, FailureKind};

/// Errors that end a run as `Failed`.
///
/// A verification failure is not here: it is an `Abstained` outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{collaborator} timed out after {timeout:?}")]
    CollaboratorTimeout {
        collaborator: String,
        timeout: Duration,
    },

    #[error("{collaborator} failed: {message}")]
    CollaboratorError {
        collaborator: String,
        message: String,
    },

    #[error("All retrieval backends unavailable (attempted: {})", .attempted.join(", "))]
    AllBackendsUnavailable { attempted: Vec<String> },

    #[error("Run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::CollaboratorTimeout { .. } => FailureKind::CollaboratorTimeout,
            Self::CollaboratorError { .. } => FailureKind::CollaboratorError,
            Self::AllBackendsUnavailable { .. } => FailureKind::AllBackendsUnavailable,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Message safe to persist on a run: collaborator and kind, nothing the
    /// collaborator echoed back.
    pub fn sanitized(&self) -> String {
        match self {
            Self::InvalidInput(_) => "invalid input".to_string(),
            Self::CollaboratorTimeout {
                collaborator,
                timeout,
            } => format!("{}: timed out after {}ms", collaborator, timeout.as_millis()),
            Self::CollaboratorError { collaborator, .. } => {
                format!("{}: collaborator error", collaborator)
            }
            Self::AllBackendsUnavailable { attempted } => format!(
                "retriever: all backends unavailable ({})",
                attempted.join(", ")
            ),
            Self::Cancelled => "cancelled".to_string(),
        }
    }

    pub(crate) fn from_collaborator(collaborator: &str, err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Timeout(timeout) => Self::CollaboratorTimeout {
                collaborator: collaborator.to_string(),
                timeout,
            },
            other => Self::CollaboratorError {
                collaborator: collaborator.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Errors reported by external collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Failed: {0}")]
    Failed(String),
}

impl CollaboratorError {
    /// Transient errors worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    /// Variant name, safe to log. The payload may echo request text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Failed(_) => "failed",
        }
    }
}
