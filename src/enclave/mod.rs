// Keyward — Enclave Module
//
// Platform-native master key storage, Argon2id subkey derivation and the
// keyed fingerprints used wherever a value must be compared or recorded
// without being stored.

mod error;
mod fingerprint;
mod provider;

pub use error::EnclaveError;
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use provider::{EnclaveKeys, KeyringProvider, MasterKeyProvider};

#[cfg(test)]
pub use provider::mock::MockKeyProvider;
