// Keyward — Sync Module
//
// Propagation of Secret entries to remote secret stores. Values are sealed
// for the destination before they leave the process and only pushed when
// their fingerprint changed.

mod crypto;
mod engine;
mod error;
mod github;
mod ledger;
mod remote;
mod target;

pub use crypto::{seal_for_destination, DestinationKey, SealedSecret};
pub use engine::{SyncEngine, SyncFailure, SyncReport, TargetRejection};
pub use error::{SyncError, SyncErrorKind};
pub use github::{GithubSecretStore, StoreTokenSource};
pub use ledger::SyncLedger;
pub use remote::{RemoteSecretStore, TokenSource};
pub use target::{SyncTarget, Visibility};

/// Something that can ask for a reconcile pass without waiting for it.
pub trait SyncTrigger: Send + Sync {
    fn trigger(&self);
}
