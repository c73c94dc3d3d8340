// Keyward — Provider rotator contract
//
// Any rotator that can issue and validate a value is usable by the
// scheduler. Strategies differ only in how the new value is obtained.

use std::fmt;

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::RotatorError;
use crate::config::ProviderStrategy;
use crate::store::SecurityTier;

#[derive(Debug, Clone)]
pub struct RotationRequest {
    pub credential_name: String,
    pub provider: String,
    pub tier: SecurityTier,
    /// Provider id of the key being replaced, when known.
    pub current_key_id: Option<String>,
}

/// A freshly issued value that has not been adopted yet.
pub struct IssuedCredential {
    value: Zeroizing<String>,
    pub key_id: Option<String>,
}

impl IssuedCredential {
    pub fn new(value: Zeroizing<String>, key_id: Option<String>) -> Self {
        Self { value, key_id }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("value", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .finish()
    }
}

#[derive(Debug)]
pub enum RotationOutcome {
    Issued(IssuedCredential),
    /// A human will supply the value through `complete_manual_rotation`.
    Pending,
}

/// Identifies the key a revocation should remove.
#[derive(Debug, Clone, Default)]
pub struct RevocationHandle {
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// The provider has no revocation step at all.
    NotSupported,
    /// Revocation was possible in principle but could not be done.
    Skipped(String),
}

#[async_trait]
pub trait ProviderRotator: Send + Sync {
    fn strategy(&self) -> ProviderStrategy;

    async fn rotate(&self, request: &RotationRequest) -> Result<RotationOutcome, RotatorError>;

    /// Live check of a candidate value. `Ok(false)` means the provider
    /// refused it.
    async fn validate(&self, name: &str, candidate: &str) -> Result<bool, RotatorError>;

    async fn revoke(&self, name: &str, handle: &RevocationHandle) -> Result<RevokeOutcome, RotatorError>;

    /// Throw away a value that was issued but never adopted.
    async fn discard(&self, _name: &str, _issued: &IssuedCredential) -> Result<(), RotatorError> {
        Ok(())
    }
}

/// A live validation check, shared by every strategy.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, name: &str, candidate: &str) -> Result<bool, RotatorError>;
}
