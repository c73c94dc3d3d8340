// Keyward — Master Key Provider
//
// Manages the master secret behind the state database and the value
// fingerprints. The secret lives in the platform keyring; two independent
// subkeys are derived from it with Argon2id:
//
//   1. `db_key` — the SQLCipher key for the state database
//   2. `fingerprint_key` — the HMAC key for audit and sync-ledger hashes
//
// Each subkey uses its own salt, so knowing one never helps recover the other.

use argon2::{Argon2, Algorithm, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Service name used to identify Keyward entries in the platform keyring.
const KEYRING_SERVICE: &str = "keyward-credential-daemon";

/// Username for the keyring entry (identifies the master secret).
const KEYRING_USER: &str = "master-secret";

/// Length of the randomly generated master secret in bytes (256-bit entropy).
const MASTER_SECRET_LEN: usize = 32;

/// Length of each derived subkey in bytes.
const DERIVED_KEY_LEN: usize = 32;

const DB_KEY_PURPOSE: &str = "state-db";
const FINGERPRINT_KEY_PURPOSE: &str = "value-fingerprint";

// Argon2id parameters: strong defaults for a security application.
// m=65536 (64 MiB), t=3 (3 iterations), p=4 (4 parallelism lanes)
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

// ─── Derived keys ────────────────────────────────────────────────────────────

/// The subkeys every other component needs. Zeroized on drop.
pub struct EnclaveKeys {
    pub db_key: Zeroizing<Vec<u8>>,
    pub fingerprint_key: Zeroizing<Vec<u8>>,
}

impl EnclaveKeys {
    /// Hex form expected by SQLCipher's `PRAGMA key = "x'...'"`.
    pub fn db_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.db_key.as_slice()))
    }
}

impl std::fmt::Debug for EnclaveKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnclaveKeys")
            .field("db_key", &"[REDACTED]")
            .field("fingerprint_key", &"[REDACTED]")
            .finish()
    }
}

/// Salt = SHA-256(context || "::" || purpose). Deterministic per
/// installation and distinct per subkey.
fn build_salt(context: &str, purpose: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(context.as_bytes());
    hasher.update(b"::");
    hasher.update(purpose.as_bytes());
    hasher.finalize().to_vec()
}

fn derive_subkey(
    master_secret: &[u8],
    context: &str,
    purpose: &str,
) -> std::result::Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let salt = build_salt(context, purpose);

    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(DERIVED_KEY_LEN))
        .map_err(|e| EnclaveError::Derivation(format!("invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut derived_key = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
    argon2
        .hash_password_into(master_secret, &salt, &mut derived_key)
        .map_err(|e| EnclaveError::Derivation(format!("Argon2id hash failed: {}", e)))?;

    Ok(derived_key)
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over master key management, enabling platform-specific backends
/// and mock implementations for testing.
pub trait MasterKeyProvider: Send + Sync {
    /// Retrieve the master secret from the platform keyring.
    /// On first run, generates a new random master secret and stores it.
    fn get_or_create_master_secret(&self) -> std::result::Result<Zeroizing<Vec<u8>>, EnclaveError>;

    /// Retrieve the master secret without creating one.
    fn get_master_secret(&self) -> std::result::Result<Zeroizing<Vec<u8>>, EnclaveError>;

    /// Check if a master secret already exists in the keyring.
    fn has_master_secret(&self) -> std::result::Result<bool, EnclaveError>;

    /// Delete the master secret from the platform keyring.
    /// WARNING: This makes the state database irrecoverable.
    fn delete_master_secret(&self) -> std::result::Result<(), EnclaveError>;

    /// Installation-specific input to every salt.
    fn salt_context(&self) -> String;

    /// Derive both subkeys from the master secret.
    fn derive_keys(&self, master_secret: &[u8]) -> std::result::Result<EnclaveKeys, EnclaveError> {
        let context = self.salt_context();
        Ok(EnclaveKeys {
            db_key: derive_subkey(master_secret, &context, DB_KEY_PURPOSE)?,
            fingerprint_key: derive_subkey(master_secret, &context, FINGERPRINT_KEY_PURPOSE)?,
        })
    }
}

// ─── Platform Implementation ─────────────────────────────────────────────────

/// Production implementation using the `keyring` crate.
/// Dispatches to:
///   - Linux: D-Bus Secret Service (GNOME Keyring / KDE Wallet)
///   - macOS: Security.framework Keychain
///   - Windows: Windows Credential Manager
pub struct KeyringProvider {
    service: String,
    user: String,
}

impl KeyringProvider {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            user: KEYRING_USER.to_string(),
        }
    }

    fn entry(&self) -> std::result::Result<keyring::Entry, EnclaveError> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| EnclaveError::Keyring(format!("failed to create keyring entry: {}", e)))
    }

    /// Generate a cryptographically secure random master secret.
    fn generate_master_secret() -> std::result::Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let mut secret = Zeroizing::new(vec![0u8; MASTER_SECRET_LEN]);
        rand::rng().fill_bytes(&mut secret);

        // Sanity check: ensure we got the right number of bytes
        if secret.len() != MASTER_SECRET_LEN {
            return Err(EnclaveError::InsufficientEntropy(
                secret.len(),
                MASTER_SECRET_LEN,
            ));
        }

        Ok(secret)
    }
}

impl Default for KeyringProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterKeyProvider for KeyringProvider {
    fn get_or_create_master_secret(&self) -> std::result::Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let entry = self.entry()?;

        // Try to retrieve existing secret
        match entry.get_secret() {
            Ok(secret) => {
                tracing::debug!("Retrieved existing master secret from keyring");
                Ok(Zeroizing::new(secret))
            }
            Err(keyring::Error::NoEntry) => {
                // First run: generate and store a new master secret
                tracing::info!("No master secret found — generating new one");
                let secret = Self::generate_master_secret()?;
                entry.set_secret(&secret).map_err(|e| {
                    EnclaveError::Keyring(format!("failed to store master secret: {}", e))
                })?;
                tracing::info!("Master secret stored in platform keyring");
                Ok(secret)
            }
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to retrieve master secret: {}",
                e
            ))),
        }
    }

    fn get_master_secret(&self) -> std::result::Result<Zeroizing<Vec<u8>>, EnclaveError> {
        match self.entry()?.get_secret() {
            Ok(secret) => Ok(Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => Err(EnclaveError::MasterSecretNotFound),
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to retrieve master secret: {}",
                e
            ))),
        }
    }

    fn salt_context(&self) -> String {
        format!("{}::{}", self.service, self.user)
    }

    fn has_master_secret(&self) -> std::result::Result<bool, EnclaveError> {
        let entry = self.entry()?;
        match entry.get_secret() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to check master secret: {}",
                e
            ))),
        }
    }

    fn delete_master_secret(&self) -> std::result::Result<(), EnclaveError> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) => {
                tracing::warn!("Master secret deleted from keyring — state database is now irrecoverable");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No master secret to delete");
                Ok(())
            }
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to delete master secret: {}",
                e
            ))),
        }
    }
}

// ─── In-Memory Mock for Testing ──────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
