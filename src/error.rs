// Keyward — Top-level error types
//
// Aggregates every subsystem's errors into one enum for the application
// boundary (daemon startup and CLI commands).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeywardError {
    #[error("Enclave error: {0}")]
    Enclave(#[from] crate::enclave::EnclaveError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Audit error: {0}")]
    Audit(#[from] crate::audit::AuditError),

    #[error("Sync error: {0}")]
    Sync(#[from] crate::sync::SyncError),

    #[error("Rotation error: {0}")]
    Rotation(#[from] crate::rotation::RotationError),

    #[error("Watcher error: {0}")]
    Watch(#[from] crate::watcher::WatchError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keyward is not initialized. Run `keyward init` first.")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, KeywardError>;
