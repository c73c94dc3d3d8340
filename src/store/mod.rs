// Keyward — Store Module
//
// The credential file holds values; the SQLCipher database holds lifecycle
// state, the audit log and the sync ledger. Nothing in the database is ever a
// credential value.

mod db;
pub mod envfile;
mod error;
mod models;
mod repository;
mod state;

pub use db::{Database, SharedDatabase};
pub use error::StoreError;
pub use models::{
    Annotate, Annotation, Classification, CredentialMetadata, CredentialRecord, CredentialRole,
    CredentialStatus, PersistedState, SecurityTier,
};
pub use repository::{CredentialStore, NameGuard, ReloadSummary, StoreEntry};
pub use state::StateRepository;
