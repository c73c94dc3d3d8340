// Keyward — Configuration error types
//
// Every variant is raised at load time. Nothing in here is deferred to the
// first sync or rotation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Sync target '{destination}' is {visibility}; only private targets are allowed")]
    TargetNotPrivate { destination: String, visibility: String },

    #[error("Tier assignment '{pattern}' names unknown tier '{tier}'")]
    UnknownTier { pattern: String, tier: String },

    #[error("Provider '{provider}' is missing required field '{field}'")]
    MissingField { provider: String, field: &'static str },

    #[error("Provider '{0}' does not cover any credential pattern")]
    NoCredentialPatterns(String),

    #[error("Duplicate provider key: {0}")]
    DuplicateProvider(String),

    #[error("Provider '{provider}' uses session driver '{driver}', which is not registered")]
    UnknownDriver { provider: String, driver: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
