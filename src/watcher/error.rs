// Keyward — Watcher error types

use thiserror::Error;

use crate::audit::AuditError;
use crate::store::StoreError;
use crate::sync::SyncError;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("File watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Credential file has no parent directory: {0}")]
    NoParent(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
