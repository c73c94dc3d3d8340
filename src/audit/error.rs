// Keyward — Audit error types

use std::time::Duration;

use thiserror::Error;

use crate::retry::Retryable;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Storage I/O. Fatal to the operation that produced the record.
    #[error("Audit storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("Audit log lock poisoned")]
    Poisoned,

    #[error("Audit write timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for AuditError {
    fn is_retryable(&self) -> bool {
        !matches!(self, AuditError::Poisoned)
    }

    fn timed_out(after: Duration) -> Self {
        AuditError::Timeout(after)
    }
}
