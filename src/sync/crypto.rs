// Keyward — Destination encryption
//
// libsodium sealed boxes (X25519 + XSalsa20-Poly1305), the scheme GitHub
// Actions uses for repository secrets. The value is sealed under the
// destination's public key before it leaves the process; only the
// destination can open it.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;
use serde::{Deserialize, Serialize};

use super::SyncError;

/// Public key published by a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationKey {
    pub key_id: String,
    /// Base64-encoded 32-byte X25519 public key.
    pub key: String,
}

/// A value encrypted for exactly one destination key.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub key_id: String,
    /// Base64 sealed box.
    pub encrypted_value: String,
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedSecret")
            .field("key_id", &self.key_id)
            .field("encrypted_value", &"[REDACTED]")
            .finish()
    }
}

pub fn seal_for_destination(key: &DestinationKey, value: &str) -> Result<SealedSecret, SyncError> {
    let raw = BASE64
        .decode(key.key.trim())
        .map_err(|e| SyncError::Encryption(format!("public key is not base64: {}", e)))?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| SyncError::Encryption(format!("public key must be 32 bytes, got {}", raw.len())))?;

    let public_key = PublicKey::from(bytes);
    let sealed = public_key
        .seal(&mut OsRng, value.as_bytes())
        .map_err(|e| SyncError::Encryption(format!("sealing failed: {}", e)))?;

    Ok(SealedSecret {
        key_id: key.key_id.clone(),
        encrypted_value: BASE64.encode(sealed),
    })
}
