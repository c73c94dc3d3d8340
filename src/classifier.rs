// Keyward — Secret / setting classifier
//
// Pure function over the configured pattern lists. Order of evaluation:
// explicit override, secret patterns, setting patterns. A name that matches
// neither list is treated as a secret. The value is never consulted, so a
// secret-looking name stays a secret whatever it holds.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::config::ConfigError;
use crate::pattern::PatternList;
use crate::store::Classification;

/// Built-in secret indicators.
pub const DEFAULT_SECRET_PATTERNS: &[&str] = &[
    "*_KEY",
    "*_TOKEN",
    "*SECRET*",
    "*PASSWORD*",
    "*PRIVATE_KEY*",
    "*AUTH*",
    "*CREDENTIALS*",
    "*DATABASE_URL*",
    "*MONGO_URI*",
    "*REDIS_URL*",
    "*CONNECTION_STRING*",
    "*DSN*",
];

/// Built-in setting indicators.
pub const DEFAULT_SETTING_PATTERNS: &[&str] = &[
    "PORT",
    "HOST",
    "DEBUG",
    "NODE_ENV",
    "ENVIRONMENT",
    "ENV",
    "TZ",
    "LANG",
    "LOG_LEVEL",
    "*_PORT",
    "*_HOST",
    "*_TIMEOUT",
    "*_LIMIT",
    "*_VERSION",
    "*_NAME",
    "*_REGION",
    "*_ZONE",
    "*_LOCALE",
];

/// Why a name got its classification. Recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", content = "pattern", rename_all = "snake_case")]
pub enum ClassificationReason {
    Override,
    SecretPattern(String),
    SettingPattern(String),
    /// Matched neither list; resolved to Secret.
    Ambiguous,
}

impl fmt::Display for ClassificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationReason::Override => write!(f, "explicit override"),
            ClassificationReason::SecretPattern(p) => write!(f, "secret pattern {}", p),
            ClassificationReason::SettingPattern(p) => write!(f, "setting pattern {}", p),
            ClassificationReason::Ambiguous => write!(f, "ambiguous, defaulted to secret"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub classification: Classification,
    pub reason: ClassificationReason,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    overrides: HashMap<String, Classification>,
    secret: PatternList,
    setting: PatternList,
}

impl Classifier {
    /// Build a classifier from the defaults extended with configured
    /// patterns. Extra patterns are evaluated after the built-in ones.
    pub fn new(
        overrides: HashMap<String, Classification>,
        extra_secret: &[String],
        extra_setting: &[String],
    ) -> Result<Self, ConfigError> {
        let secret: Vec<&str> = DEFAULT_SECRET_PATTERNS
            .iter()
            .copied()
            .chain(extra_secret.iter().map(String::as_str))
            .collect();
        let setting: Vec<&str> = DEFAULT_SETTING_PATTERNS
            .iter()
            .copied()
            .chain(extra_setting.iter().map(String::as_str))
            .collect();

        Ok(Self {
            overrides,
            secret: PatternList::compile(&secret)?,
            setting: PatternList::compile(&setting)?,
        })
    }

    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(HashMap::new(), &[], &[])
    }

    /// Classify `name`. `explicit_override` wins over configured overrides,
    /// which win over patterns.
    pub fn classify(
        &self,
        name: &str,
        _value: &str,
        explicit_override: Option<Classification>,
    ) -> Classification {
        match explicit_override {
            Some(c) => c,
            None => self.decide(name).classification,
        }
    }

    /// Classification plus the rule that produced it.
    pub fn decide(&self, name: &str) -> Decision {
        if let Some(c) = self.overrides.get(name) {
            return Decision {
                classification: *c,
                reason: ClassificationReason::Override,
            };
        }

        if let Some(p) = self.secret.first_match(name) {
            return Decision {
                classification: Classification::Secret,
                reason: ClassificationReason::SecretPattern(p.to_string()),
            };
        }

        if let Some(p) = self.setting.first_match(name) {
            return Decision {
                classification: Classification::Setting,
                reason: ClassificationReason::SettingPattern(p.to_string()),
            };
        }

        tracing::debug!(credential = %name, "No classification rule matched, treating as secret");
        Decision {
            classification: Classification::Secret,
            reason: ClassificationReason::Ambiguous,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
