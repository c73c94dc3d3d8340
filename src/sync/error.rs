// Keyward — Sync error types

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditError;
use crate::retry::Retryable;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Non-private destination. Fatal for that target only.
    #[error("Sync target '{destination}' rejected: {reason}")]
    TargetRejected { destination: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Authentication unavailable: {0}")]
    Auth(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

/// Coarse error classification reported in `SyncReport.failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    TargetRejected,
    Transport,
    Timeout,
    Remote,
    Encryption,
    Auth,
    Storage,
    Audit,
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::TargetRejected { .. } => SyncErrorKind::TargetRejected,
            SyncError::Transport(_) => SyncErrorKind::Transport,
            SyncError::Timeout(_) => SyncErrorKind::Timeout,
            SyncError::Remote { .. } => SyncErrorKind::Remote,
            SyncError::Encryption(_) => SyncErrorKind::Encryption,
            SyncError::Auth(_) => SyncErrorKind::Auth,
            SyncError::Store(_) => SyncErrorKind::Storage,
            SyncError::Audit(_) => SyncErrorKind::Audit,
        }
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout(_) => true,
            SyncError::Remote { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        SyncError::Timeout(after)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            SyncError::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Transport("reset".into()).is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(SyncError::Remote { status: 502, message: String::new() }.is_retryable());
        assert!(SyncError::Remote { status: 429, message: String::new() }.is_retryable());
        assert!(!SyncError::Remote { status: 404, message: String::new() }.is_retryable());
        assert!(!SyncError::Encryption("bad key".into()).is_retryable());
        assert!(!SyncError::TargetRejected {
            destination: "a/b".into(),
            reason: "public".into()
        }
        .is_retryable());
    }
}
