// Keyward — Value fingerprints
//
// One-way, keyed hashes of credential values. Used for the audit log's
// before/after hashes and for the sync ledger. HMAC-SHA256 under the
// fingerprint subkey: stable across restarts, but a leaked audit log cannot
// be brute-forced without the master secret.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::EnclaveError;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the MAC (128 bits).
const FINGERPRINT_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a fingerprint read back from storage.
    pub fn from_stored(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct Fingerprinter {
    mac: HmacSha256,
}

impl Fingerprinter {
    pub fn new(key: &[u8]) -> Result<Self, EnclaveError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| EnclaveError::Derivation(format!("invalid fingerprint key: {}", e)))?;
        Ok(Self { mac })
    }

    pub fn fingerprint(&self, value: &str) -> Fingerprint {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        let mut hex = hex::encode(mac.finalize().into_bytes());
        hex.truncate(FINGERPRINT_HEX_LEN);
        Fingerprint(hex)
    }
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter").field("key", &"[REDACTED]").finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
