//! Error types for the tender workspace
//!
//! Provides error handling for:
//! - Backend calls (network, rejection, decoding)
//! - Job submission and result fetching
//! - Task state machine violations
//! - Configuration problems

use crate::types::{ProjectId, RunStatus, TaskKind};

/// Main workspace error type
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// A command needs an active project but none is selected
    #[error("no active project")]
    NoActiveProject,

    /// The submit call itself failed; no run was created
    #[error("failed to submit {kind}: {source}")]
    Submission {
        /// Kind that was submitted
        kind: TaskKind,
        /// Underlying backend error
        #[source]
        source: BackendError,
    },

    /// The job succeeded but its output could not be fetched
    #[error("failed to fetch {kind} result: {source}")]
    ResultFetch {
        /// Kind whose result was requested
        kind: TaskKind,
        /// Underlying backend error
        #[source]
        source: BackendError,
    },

    /// Latest runs could not be loaded for a project
    #[error("failed to resume project {project}: {source}")]
    Resume {
        /// Project being resumed
        project: ProjectId,
        /// Underlying backend error
        #[source]
        source: BackendError,
    },

    /// Task state machine violation
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkspaceError {
    /// Check if the underlying backend error is transient
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submission { source, .. }
            | Self::ResultFetch { source, .. }
            | Self::Resume { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Errors reported by a backend implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Transport failure or timeout
    #[error("network error: {0}")]
    Network(String),

    /// The backend refused the request
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP-like status code
        status: u16,
        /// Backend message
        message: String,
    },

    /// Unknown run, project or result
    #[error("not found: {0}")]
    NotFound(String),

    /// Response body had an unexpected shape
    #[error("decode error: {0}")]
    Decode(String),
}

impl BackendError {
    /// Network failures and server-side errors may succeed when retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::Decode(_) => false,
        }
    }
}

/// Task state machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// A terminal run cannot change status
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: RunStatus,
        /// Requested status
        to: RunStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_error_display() {
        let err = WorkspaceError::Submission {
            kind: TaskKind::Review,
            source: BackendError::Network("connection reset".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to submit review: network error: connection reset"
        );
    }

    #[test]
    fn backend_error_is_retryable() {
        assert!(BackendError::Network("timeout".to_string()).is_retryable());
        assert!(BackendError::Rejected {
            status: 503,
            message: "busy".to_string()
        }
        .is_retryable());
        assert!(!BackendError::Rejected {
            status: 422,
            message: "bad bidder".to_string()
        }
        .is_retryable());
        assert!(!BackendError::Decode("eof".to_string()).is_retryable());
    }

    #[test]
    fn workspace_error_is_retryable_follows_source() {
        let transient = WorkspaceError::ResultFetch {
            kind: TaskKind::InfoExtraction,
            source: BackendError::Network("reset".to_string()),
        };
        assert!(transient.is_retryable());
        assert!(!WorkspaceError::NoActiveProject.is_retryable());
        assert!(!WorkspaceError::Config("x".to_string()).is_retryable());
    }

    #[test]
    fn lifecycle_error_converts() {
        let err: WorkspaceError = LifecycleError::IllegalTransition {
            from: RunStatus::Success,
            to: RunStatus::Running,
        }
        .into();
        assert!(err.to_string().contains("success -> running"));
    }
}
