// Keyward — Credential data models
//
// SECURITY: `value` and `previous_value` are private. They never appear in
// Debug output, log messages, or serialized metadata. Access goes through
// `CredentialStore::value()`, which hands out a zeroizing copy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Secret (protected, synced) versus setting (plain config, never synced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Secret,
    Setting,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Secret => write!(f, "secret"),
            Classification::Setting => write!(f, "setting"),
        }
    }
}

/// Rotation urgency / approval class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityTier {
    High,
    Standard,
    Low,
}

impl SecurityTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Some(SecurityTier::High),
            "standard" => Some(SecurityTier::Standard),
            "low" => Some(SecurityTier::Low),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityTier::High => write!(f, "high"),
            SecurityTier::Standard => write!(f, "standard"),
            SecurityTier::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    RotationPending,
    Rotating,
    Validating,
    RotationFailed,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::RotationPending => "rotation_pending",
            CredentialStatus::Rotating => "rotating",
            CredentialStatus::Validating => "validating",
            CredentialStatus::RotationFailed => "rotation_failed",
            CredentialStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CredentialStatus::Active),
            "rotation_pending" => Some(CredentialStatus::RotationPending),
            "rotating" => Some(CredentialStatus::Rotating),
            "validating" => Some(CredentialStatus::Validating),
            "rotation_failed" => Some(CredentialStatus::RotationFailed),
            "revoked" => Some(CredentialStatus::Revoked),
            _ => None,
        }
    }
}

/// Bootstrap credentials administer other rotations (admin API keys, the
/// GitHub token). They are never rotated without explicit approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRole {
    Standard,
    Bootstrap,
}

/// Everything the store needs to know about a name that does not come from
/// the credential file itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub classification: Classification,
    pub provider: Option<String>,
    pub security_tier: SecurityTier,
    pub role: CredentialRole,
}

/// Source of annotations for credential names (classifier + policy lookups).
pub trait Annotate: Send + Sync {
    fn annotate(&self, name: &str) -> Annotation;
}

/// Lifecycle state that survives restarts. Never holds a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    pub name: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
    pub provider_key_id: Option<String>,
}

/// The full in-memory credential record.
pub struct CredentialRecord {
    pub name: String,
    /// Current secret material — NEVER printed, logged, or Debug-displayed
    value: Zeroizing<String>,
    /// Value held back for rollback while a replacement is unconfirmed
    previous_value: Option<Zeroizing<String>>,
    pub classification: Classification,
    pub provider: Option<String>,
    pub security_tier: SecurityTier,
    pub role: CredentialRole,
    pub first_seen_at: DateTime<Utc>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
    /// Provider-side identifier of the current key, when the provider has one
    pub provider_key_id: Option<String>,
}

impl CredentialRecord {
    pub fn new(name: String, value: Zeroizing<String>, annotation: Annotation, now: DateTime<Utc>) -> Self {
        Self {
            name,
            value,
            previous_value: None,
            classification: annotation.classification,
            provider: annotation.provider,
            security_tier: annotation.security_tier,
            role: annotation.role,
            first_seen_at: now,
            last_rotated_at: None,
            status: CredentialStatus::Active,
            provider_key_id: None,
        }
    }

    /// Access the raw value.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub(crate) fn set_value(&mut self, value: Zeroizing<String>) {
        self.value = value;
    }

    pub(crate) fn stage(&mut self, new_value: Zeroizing<String>) {
        let old = std::mem::replace(&mut self.value, new_value);
        self.previous_value = Some(old);
    }

    pub(crate) fn take_previous(&mut self) -> Option<Zeroizing<String>> {
        self.previous_value.take()
    }

    pub fn has_pending_replacement(&self) -> bool {
        self.previous_value.is_some()
    }

    pub(crate) fn apply_state(&mut self, state: &PersistedState) {
        self.first_seen_at = state.first_seen_at;
        self.last_rotated_at = state.last_rotated_at;
        self.status = state.status;
        self.provider_key_id = state.provider_key_id.clone();
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            name: self.name.clone(),
            first_seen_at: self.first_seen_at,
            last_rotated_at: self.last_rotated_at,
            status: self.status,
            provider_key_id: self.provider_key_id.clone(),
        }
    }

    pub fn metadata(&self) -> CredentialMetadata {
        CredentialMetadata {
            name: self.name.clone(),
            classification: self.classification,
            provider: self.provider.clone(),
            security_tier: self.security_tier,
            role: self.role,
            status: self.status,
            first_seen_at: self.first_seen_at,
            last_rotated_at: self.last_rotated_at,
        }
    }
}

/// Custom Debug implementation that NEVER reveals the value.
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("pending_replacement", &self.previous_value.is_some())
            .field("classification", &self.classification)
            .field("provider", &self.provider)
            .field("security_tier", &self.security_tier)
            .field("role", &self.role)
            .field("first_seen_at", &self.first_seen_at)
            .field("last_rotated_at", &self.last_rotated_at)
            .field("status", &self.status)
            .finish()
    }
}

/// A value-free view of a credential. This is everything external readers
/// (CLI listings, the runaway monitor) ever see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub name: String,
    pub classification: Classification,
    pub provider: Option<String>,
    pub security_tier: SecurityTier,
    pub role: CredentialRole,
    pub status: CredentialStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_rotated_at: Option<DateTime<Utc>>,
}

impl fmt::Display for CredentialMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}) — {}",
            self.name,
            self.classification,
            self.security_tier,
            self.status.as_str()
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
