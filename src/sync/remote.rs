// Keyward — Remote secret store abstraction

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::crypto::{DestinationKey, SealedSecret};
use super::target::Visibility;
use super::SyncError;

/// A store that accepts public-key-encrypted secrets, one name at a time,
/// and exposes a visibility flag readable before any write.
#[async_trait]
pub trait RemoteSecretStore: Send + Sync {
    async fn visibility(&self, destination: &str) -> Result<Visibility, SyncError>;

    async fn public_key(&self, destination: &str) -> Result<DestinationKey, SyncError>;

    /// Create or update `name` under `destination`.
    async fn put_secret(&self, destination: &str, name: &str, sealed: &SealedSecret) -> Result<(), SyncError>;
}

/// Source of the bearer token used against a remote store. Read at call time
/// so a rotated token takes effect without restart.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<Zeroizing<String>, SyncError>;
}
