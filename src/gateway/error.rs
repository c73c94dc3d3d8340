// Keyward — Gateway error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Daemon closed the connection")]
    Closed,

    #[error("Cannot reach the daemon at {path}: {source}. Is `keyward serve` running?")]
    Unreachable { path: String, source: std::io::Error },

    /// An error object returned by the daemon.
    #[error("{message} (code {code})")]
    Rpc { code: i32, message: String },
}
