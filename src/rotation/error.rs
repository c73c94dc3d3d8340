// Keyward — Rotation error types

use std::time::Duration;

use thiserror::Error;

use super::job::JobState;
use crate::audit::AuditError;
use crate::retry::Retryable;
use crate::store::StoreError;

/// Failures reported by a provider rotator.
#[derive(Debug, Error)]
pub enum RotatorError {
    /// Transport-level failure reaching the provider.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Credential {0} is required for this provider but not loaded")]
    MissingCredential(String),

    #[error("Session failed: {0}")]
    Session(String),
}

impl Retryable for RotatorError {
    fn is_retryable(&self) -> bool {
        match self {
            RotatorError::Unavailable(_) | RotatorError::Timeout(_) => true,
            RotatorError::Rejected { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        RotatorError::Timeout(after)
    }
}

impl From<reqwest::Error> for RotatorError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RotatorError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_timeout() => RotatorError::Unavailable(format!("timed out: {}", e)),
            None => RotatorError::Unavailable(e.to_string()),
        }
    }
}

/// Failures of the rotation state machine.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Rotation conflict: {name} already has a job in state {state}")]
    Conflict { name: String, state: JobState },

    #[error("New value for {0} failed validation; the previous value stays active")]
    ValidationFailed(String),

    #[error("No rotation job for {0}")]
    NoJob(String),

    #[error("Invalid state for {name}: job is {state}, {expected}")]
    InvalidState {
        name: String,
        state: JobState,
        expected: &'static str,
    },

    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("{0} is classified as a setting and is never rotated")]
    NotRotatable(String),

    #[error("No rotator is registered for {0}")]
    NoProvider(String),

    #[error("Rotator error: {0}")]
    Rotator(#[from] RotatorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Job table lock poisoned")]
    Poisoned,
}
