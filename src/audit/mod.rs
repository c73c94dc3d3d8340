// Keyward — Audit Module
//
// Append-only ledger of classification, sync and rotation events. Records
// carry value fingerprints, never values.

mod error;
mod log;
mod record;

pub use error::AuditError;
pub use log::{AuditLog, SqliteAuditLog};
pub use record::{AuditAction, AuditQuery, AuditRecord, SYSTEM_ACTOR};
