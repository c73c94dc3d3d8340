// Keyward — Store error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential file error ({path}): {source}")]
    CredentialFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Value for {0} spans more than one line and cannot be stored")]
    MultiLineValue(String),

    #[error("No pending replacement for credential: {0}")]
    NoPendingReplacement(String),

    #[error("Database lock poisoned")]
    Poisoned,

    #[error("Database not initialized — run `keyward init` first")]
    NotInitialized,

    #[error("Invalid database key — database may be corrupted or key is wrong")]
    InvalidKey,
}
