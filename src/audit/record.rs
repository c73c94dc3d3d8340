// Keyward — Audit records
//
// Hash-only by construction: the value slots are `Fingerprint`s, so a raw
// credential cannot be placed in a record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enclave::Fingerprint;

/// Actor recorded for transitions the engine makes on its own.
pub const SYSTEM_ACTOR: &str = "keyward";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Classified,
    Synced,
    RotationStarted,
    RotationValidated,
    RotationCompleted,
    RotationFailed,
    RotationRolledBack,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Classified => "classified",
            AuditAction::Synced => "synced",
            AuditAction::RotationStarted => "rotation_started",
            AuditAction::RotationValidated => "rotation_validated",
            AuditAction::RotationCompleted => "rotation_completed",
            AuditAction::RotationFailed => "rotation_failed",
            AuditAction::RotationRolledBack => "rotation_rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classified" => Some(AuditAction::Classified),
            "synced" => Some(AuditAction::Synced),
            "rotation_started" => Some(AuditAction::RotationStarted),
            "rotation_validated" => Some(AuditAction::RotationValidated),
            "rotation_completed" => Some(AuditAction::RotationCompleted),
            "rotation_failed" => Some(AuditAction::RotationFailed),
            "rotation_rolled_back" => Some(AuditAction::RotationRolledBack),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Assigned on append.
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub credential_name: String,
    pub old_value_hash: Option<Fingerprint>,
    pub new_value_hash: Option<Fingerprint>,
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, credential_name: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            credential_name: credential_name.into(),
            old_value_hash: None,
            new_value_hash: None,
            detail: None,
        }
    }

    pub fn with_hashes(mut self, old: Option<Fingerprint>, new: Option<Fingerprint>) -> Self {
        self.old_value_hash = old;
        self.new_value_hash = new;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} by '{}'",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            self.credential_name,
            self.actor
        )?;
        if let (Some(old), Some(new)) = (&self.old_value_hash, &self.new_value_hash) {
            write!(f, " {} → {}", old, new)?;
        }
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

/// Reader-side filter. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub credential_name: Option<String>,
    pub actions: Vec<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_credential(name: impl Into<String>) -> Self {
        Self {
            credential_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.actions.push(action);
        self
    }
}
