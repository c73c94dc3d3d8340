// Keyward — Configuration
//
// One TOML document (`keyward.toml`). Parsing and validation both happen in
// `Config::from_toml`; a bad pattern, a non-private target or an unknown tier
// stops the process before anything touches a credential.

mod error;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::pattern::PatternList;
use crate::retry::RetryPolicy;
use crate::rotation::{RotationPolicy, TierAssignment, TierPolicy};
use crate::store::{Classification, SecurityTier};
use crate::sync::{SyncTarget, Visibility};

pub use error::ConfigError;

/// Default directory for Keyward data files (the encrypted state database).
pub fn data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyward")
}

/// Default location of `keyward.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyward")
        .join("keyward.toml")
}

// ─── Raw document ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    daemon: DaemonSection,
    #[serde(default)]
    classifier: ClassifierSection,
    #[serde(default)]
    github: GithubConfig,
    #[serde(default)]
    targets: BTreeMap<String, TargetSection>,
    #[serde(default)]
    tiers: BTreeMap<String, TierPolicy>,
    #[serde(default)]
    default_tier: Option<String>,
    #[serde(default)]
    tier_assignments: Vec<TierAssignmentSection>,
    #[serde(default)]
    providers: Vec<ProviderSection>,
    #[serde(default)]
    notifications: NotificationsConfig,
    #[serde(default)]
    bootstrap: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DaemonSection {
    debounce_ms: u64,
    evaluation_interval_secs: u64,
    max_in_flight: usize,
    timeout_secs: u64,
    retry_attempts: u32,
    retry_base_delay_ms: u64,
    retry_max_delay_ms: u64,
    job_history: usize,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            debounce_ms: 3_000,
            evaluation_interval_secs: 3_600,
            max_in_flight: 2,
            timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            job_history: 256,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ClassifierSection {
    secret_patterns: Vec<String>,
    setting_patterns: Vec<String>,
    overrides: HashMap<String, Classification>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetSection {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    visibility: Visibility,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TierAssignmentSection {
    pattern: String,
    tier: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderSection {
    key: String,
    strategy: ProviderStrategy,
    #[serde(default)]
    credentials: Vec<String>,
    #[serde(default)]
    admin_credential: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    create_path: Option<String>,
    #[serde(default)]
    create_body: Option<serde_json::Value>,
    #[serde(default)]
    revoke_path: Option<String>,
    #[serde(default)]
    value_pointer: Option<String>,
    #[serde(default)]
    key_id_pointer: Option<String>,
    #[serde(default)]
    driver: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    validation: Option<ValidationConfig>,
}

// ─── Validated configuration ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub debounce: Duration,
    pub evaluation_interval: Duration,
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    /// Finished jobs kept for `jobs()` listings.
    pub job_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GithubConfig {
    pub api_url: String,
    /// Name of the Bootstrap credential holding the API token.
    pub token_credential: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token_credential: "GITHUB_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStrategy {
    Api,
    Session,
    Manual,
}

impl fmt::Display for ProviderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStrategy::Api => write!(f, "api"),
            ProviderStrategy::Session => write!(f, "session"),
            ProviderStrategy::Manual => write!(f, "manual"),
        }
    }
}

/// Live validation endpoint for candidate credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    pub url: String,
    /// Header carrying the candidate.
    #[serde(default = "default_auth_header")]
    pub header: String,
    /// Prefix placed before the candidate, e.g. `Bearer`. Empty for none.
    #[serde(default = "default_auth_scheme")]
    pub scheme: String,
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_auth_scheme() -> String {
    "Bearer".to_string()
}

/// Key-management API description for `api` providers.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiProviderConfig {
    pub admin_credential: String,
    pub base_url: String,
    pub create_path: String,
    pub create_body: Option<serde_json::Value>,
    /// May contain `{key_id}`.
    pub revoke_path: Option<String>,
    /// JSON pointer to the new value in the create response.
    pub value_pointer: String,
    /// JSON pointer to the new key id in the create response.
    pub key_id_pointer: String,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub key: String,
    pub strategy: ProviderStrategy,
    credentials: PatternList,
    pub api: Option<ApiProviderConfig>,
    pub driver: Option<String>,
    pub instructions: Option<String>,
    pub validation: Option<ValidationConfig>,
}

impl ProviderConfig {
    /// Whether this provider owns the credential `name`.
    pub fn covers(&self, name: &str) -> bool {
        self.credentials.matches(name)
    }

    pub fn credential_patterns(&self) -> Vec<String> {
        self.credentials.sources()
    }

    /// A manual provider covering `patterns`. Used where a provider must
    /// exist but no configuration describes it.
    pub fn manual(key: impl Into<String>, patterns: &[&str]) -> Result<Self, ConfigError> {
        Ok(Self {
            key: key.into(),
            strategy: ProviderStrategy::Manual,
            credentials: PatternList::compile(patterns)?,
            api: None,
            driver: None,
            instructions: None,
            validation: None,
        })
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    /// HMAC-SHA256 key for the `X-Keyward-Signature` header.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationsConfig {
    pub log: bool,
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            log: true,
            webhooks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub classifier: Classifier,
    pub github: GithubConfig,
    pub targets: Vec<SyncTarget>,
    pub policy: RotationPolicy,
    pub providers: Vec<ProviderConfig>,
    pub notifications: NotificationsConfig,
    bootstrap: HashSet<String>,
}

impl Config {
    /// Read and validate `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config = Self::from_toml(&raw)?;
                tracing::info!(
                    path = %path.display(),
                    targets = config.targets.len(),
                    providers = config.providers.len(),
                    "Configuration loaded"
                );
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::from_toml("")
            }
            Err(e) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(raw)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let daemon = Self::daemon_config(&raw.daemon)?;

        let classifier = Classifier::new(
            raw.classifier.overrides,
            &raw.classifier.secret_patterns,
            &raw.classifier.setting_patterns,
        )?;

        let mut targets = Vec::with_capacity(raw.targets.len());
        for (destination, section) in raw.targets {
            if section.visibility != Visibility::Private {
                return Err(ConfigError::TargetNotPrivate {
                    destination,
                    visibility: section.visibility.to_string(),
                });
            }
            targets.push(SyncTarget::new(
                destination,
                &section.include,
                &section.exclude,
                section.visibility,
            )?);
        }

        let policy = Self::rotation_policy(raw.tiers, raw.default_tier, raw.tier_assignments)?;
        let providers = Self::provider_configs(raw.providers)?;

        let mut bootstrap: HashSet<String> = raw.bootstrap.into_iter().collect();
        bootstrap.insert(raw.github.token_credential.clone());
        for provider in &providers {
            if let Some(api) = &provider.api {
                bootstrap.insert(api.admin_credential.clone());
            }
        }

        Ok(Self {
            daemon,
            classifier,
            github: raw.github,
            targets,
            policy,
            providers,
            notifications: raw.notifications,
            bootstrap,
        })
    }

    fn daemon_config(section: &DaemonSection) -> Result<DaemonConfig, ConfigError> {
        if section.max_in_flight == 0 {
            return Err(ConfigError::Invalid("daemon.max_in_flight must be at least 1".into()));
        }
        if section.retry_attempts == 0 {
            return Err(ConfigError::Invalid("daemon.retry_attempts must be at least 1".into()));
        }
        if section.timeout_secs == 0 {
            return Err(ConfigError::Invalid("daemon.timeout_secs must be at least 1".into()));
        }

        Ok(DaemonConfig {
            debounce: Duration::from_millis(section.debounce_ms),
            evaluation_interval: Duration::from_secs(section.evaluation_interval_secs.max(1)),
            max_in_flight: section.max_in_flight,
            retry: RetryPolicy {
                max_attempts: section.retry_attempts,
                base_delay: Duration::from_millis(section.retry_base_delay_ms),
                max_delay: Duration::from_millis(section.retry_max_delay_ms),
                timeout: Duration::from_secs(section.timeout_secs),
            },
            job_history: section.job_history,
        })
    }

    fn rotation_policy(
        raw_tiers: BTreeMap<String, TierPolicy>,
        default_tier: Option<String>,
        raw_assignments: Vec<TierAssignmentSection>,
    ) -> Result<RotationPolicy, ConfigError> {
        let mut tiers = HashMap::new();
        for (name, policy) in raw_tiers {
            let tier = SecurityTier::parse(&name).ok_or_else(|| ConfigError::UnknownTier {
                pattern: format!("[tiers.{}]", name),
                tier: name.clone(),
            })?;
            tiers.insert(tier, policy);
        }

        let default_tier = match default_tier {
            Some(t) => SecurityTier::parse(&t).ok_or(ConfigError::UnknownTier {
                pattern: "default_tier".to_string(),
                tier: t,
            })?,
            None => SecurityTier::Standard,
        };

        let mut assignments = Vec::with_capacity(raw_assignments.len());
        for a in raw_assignments {
            let tier = SecurityTier::parse(&a.tier).ok_or_else(|| ConfigError::UnknownTier {
                pattern: a.pattern.clone(),
                tier: a.tier.clone(),
            })?;
            assignments.push(TierAssignment::new(PatternList::compile(&[&a.pattern])?, tier));
        }

        Ok(RotationPolicy::new(tiers, assignments, default_tier))
    }

    fn provider_configs(raw: Vec<ProviderSection>) -> Result<Vec<ProviderConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(raw.len());

        for p in raw {
            if !seen.insert(p.key.clone()) {
                return Err(ConfigError::DuplicateProvider(p.key));
            }
            if p.credentials.is_empty() {
                return Err(ConfigError::NoCredentialPatterns(p.key));
            }

            let api = match p.strategy {
                ProviderStrategy::Api => {
                    let missing = |field: &'static str| ConfigError::MissingField {
                        provider: p.key.clone(),
                        field,
                    };
                    Some(ApiProviderConfig {
                        admin_credential: p.admin_credential.clone().ok_or_else(|| missing("admin_credential"))?,
                        base_url: p.base_url.clone().ok_or_else(|| missing("base_url"))?,
                        create_path: p.create_path.clone().ok_or_else(|| missing("create_path"))?,
                        create_body: p.create_body.clone(),
                        revoke_path: p.revoke_path.clone(),
                        value_pointer: p.value_pointer.clone().unwrap_or_else(|| "/key".to_string()),
                        key_id_pointer: p.key_id_pointer.clone().unwrap_or_else(|| "/id".to_string()),
                    })
                }
                _ => None,
            };

            if p.strategy == ProviderStrategy::Session && p.driver.is_none() {
                return Err(ConfigError::MissingField {
                    provider: p.key,
                    field: "driver",
                });
            }

            providers.push(ProviderConfig {
                credentials: PatternList::compile(&p.credentials)?,
                key: p.key,
                strategy: p.strategy,
                api,
                driver: p.driver,
                instructions: p.instructions,
                validation: p.validation,
            });
        }

        Ok(providers)
    }

    pub fn provider(&self, key: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.key == key)
    }

    /// The first provider, in declaration order, covering `name`.
    pub fn provider_for(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.covers(name))
    }

    /// Explicit bootstrap names, every admin credential and the GitHub token.
    pub fn is_bootstrap(&self, name: &str) -> bool {
        self.bootstrap.contains(name)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
