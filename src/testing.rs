// Keyward — Test doubles shared across module tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crypto_box::aead::OsRng;
use crypto_box::SecretKey;
use tokio::sync::Semaphore;
use zeroize::Zeroizing;

use crate::alerts::{Notification, NotificationKind, Notifier, NotifyError};
use crate::audit::{AuditAction, AuditError, AuditLog, AuditQuery, AuditRecord, SqliteAuditLog};
use crate::catalog::Catalog;
use crate::config::{Config, ProviderStrategy};
use crate::rotation::{
    IssuedCredential, ProviderRotator, RevocationHandle, RevokeOutcome, RotationOutcome, RotationRequest,
    RotatorError,
};
use crate::store::{CredentialStore, SharedDatabase, StateRepository, StoreError};
use crate::sync::{DestinationKey, RemoteSecretStore, SealedSecret, SyncError, SyncTrigger, Visibility};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A store over a temp `.env` holding `contents`, annotated by `config`.
pub async fn loaded_store_with(config: &Config, contents: &str) -> (tempfile::TempDir, Arc<CredentialStore>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    std::fs::write(&path, contents).unwrap();

    let store = Arc::new(CredentialStore::new(
        path,
        Arc::new(Catalog::new(Arc::new(config.clone()))),
        StateRepository::new(SharedDatabase::in_memory()),
    ));
    store.reload().await.unwrap();
    (dir, store)
}

pub async fn loaded_store(contents: &str) -> (tempfile::TempDir, Arc<CredentialStore>) {
    loaded_store_with(&Config::from_toml("").unwrap(), contents).await
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.all().into_iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn disk_error() -> AuditError {
    AuditError::Storage(StoreError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
        Some("disk I/O error".into()),
    )))
}

/// Every append fails as if the disk were gone.
pub struct FailingAuditLog;

impl AuditLog for FailingAuditLog {
    fn append(&self, _record: AuditRecord) -> Result<AuditRecord, AuditError> {
        Err(disk_error())
    }

    fn query(&self, _query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(Vec::new())
    }
}

/// An in-memory log whose first `failures` appends of `action` fail.
pub struct FlakyAuditLog {
    inner: SqliteAuditLog,
    action: AuditAction,
    remaining: AtomicUsize,
}

impl FlakyAuditLog {
    pub fn new(action: AuditAction, failures: usize) -> Self {
        Self {
            inner: SqliteAuditLog::new(SharedDatabase::in_memory()).unwrap(),
            action,
            remaining: AtomicUsize::new(failures),
        }
    }
}

impl AuditLog for FlakyAuditLog {
    fn append(&self, record: AuditRecord) -> Result<AuditRecord, AuditError> {
        if record.action == self.action
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(disk_error());
        }
        self.inner.append(record)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        self.inner.query(query)
    }
}

// ─── Sync ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CountingTrigger {
    count: AtomicUsize,
}

impl CountingTrigger {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl SyncTrigger for CountingTrigger {
    fn trigger(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A remote store that keeps sealed values in memory and can open them.
/// Every destination is private unless told otherwise.
pub struct InMemoryRemote {
    secret: SecretKey,
    visibility: Mutex<HashMap<String, Visibility>>,
    puts: Mutex<Vec<(String, String, SealedSecret)>>,
    failing: Mutex<HashSet<String>>,
    visibility_checks: AtomicUsize,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self {
            secret: SecretKey::generate(&mut OsRng),
            visibility: Mutex::new(HashMap::new()),
            puts: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            visibility_checks: AtomicUsize::new(0),
        }
    }
}

impl InMemoryRemote {
    pub fn set_visibility(&self, destination: &str, visibility: Visibility) {
        self.visibility.lock().unwrap().insert(destination.to_string(), visibility);
    }

    /// Every put for `name` answers 500.
    pub fn fail_puts_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn visibility_checks(&self) -> usize {
        self.visibility_checks.load(Ordering::SeqCst)
    }

    /// Distinct names written to `destination`, sorted.
    pub fn pushed_names(&self, destination: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _, _)| d == destination)
            .map(|(_, n, _)| n.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Decrypt the latest value written for `name`.
    pub fn opened(&self, destination: &str, name: &str) -> Option<String> {
        let puts = self.puts.lock().unwrap();
        let (_, _, sealed) = puts.iter().rev().find(|(d, n, _)| d == destination && n == name)?;
        let ciphertext = BASE64.decode(&sealed.encrypted_value).ok()?;
        let plain = self.secret.unseal(&ciphertext).ok()?;
        String::from_utf8(plain).ok()
    }
}

#[async_trait]
impl RemoteSecretStore for InMemoryRemote {
    async fn visibility(&self, destination: &str) -> Result<Visibility, SyncError> {
        self.visibility_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .visibility
            .lock()
            .unwrap()
            .get(destination)
            .copied()
            .unwrap_or(Visibility::Private))
    }

    async fn public_key(&self, _destination: &str) -> Result<DestinationKey, SyncError> {
        Ok(DestinationKey {
            key_id: "test-key".into(),
            key: BASE64.encode(self.secret.public_key().as_bytes()),
        })
    }

    async fn put_secret(&self, destination: &str, name: &str, sealed: &SealedSecret) -> Result<(), SyncError> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(SyncError::Remote {
                status: 500,
                message: "injected failure".into(),
            });
        }
        self.puts
            .lock()
            .unwrap()
            .push((destination.to_string(), name.to_string(), sealed.clone()));
        Ok(())
    }
}

// ─── Rotation ────────────────────────────────────────────────────────────────

/// A rotator whose behaviour is set up front. Issues `rotated-<n>` values.
pub struct ScriptedRotator {
    pending: bool,
    issues: Option<String>,
    valid: AtomicBool,
    revoke_outcome: RevokeOutcome,
    gate: Option<Arc<Semaphore>>,
    rotations: AtomicUsize,
    revocations: AtomicUsize,
    discards: AtomicUsize,
}

impl ScriptedRotator {
    pub fn new() -> Self {
        Self {
            pending: false,
            issues: None,
            valid: AtomicBool::new(true),
            revoke_outcome: RevokeOutcome::Revoked,
            gate: None,
            rotations: AtomicUsize::new(0),
            revocations: AtomicUsize::new(0),
            discards: AtomicUsize::new(0),
        }
    }

    /// `rotate` returns Pending, like a manual provider.
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    /// `rotate` issues exactly `value` instead of `rotated-<n>`.
    pub fn issuing(mut self, value: &str) -> Self {
        self.issues = Some(value.to_string());
        self
    }

    /// `validate` refuses every value.
    pub fn rejecting(self) -> Self {
        self.valid.store(false, Ordering::SeqCst);
        self
    }

    pub fn revoke_with(mut self, outcome: RevokeOutcome) -> Self {
        self.revoke_outcome = outcome;
        self
    }

    /// `rotate` blocks until a permit is added to the returned semaphore.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    pub fn revocations(&self) -> usize {
        self.revocations.load(Ordering::SeqCst)
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderRotator for ScriptedRotator {
    fn strategy(&self) -> ProviderStrategy {
        if self.pending {
            ProviderStrategy::Manual
        } else {
            ProviderStrategy::Api
        }
    }

    async fn rotate(&self, _request: &RotationRequest) -> Result<RotationOutcome, RotatorError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let n = self.rotations.fetch_add(1, Ordering::SeqCst) + 1;
        if self.pending {
            return Ok(RotationOutcome::Pending);
        }
        Ok(RotationOutcome::Issued(IssuedCredential::new(
            Zeroizing::new(self.issues.clone().unwrap_or_else(|| format!("rotated-{}", n))),
            Some(format!("key-{}", n)),
        )))
    }

    async fn validate(&self, _name: &str, _candidate: &str) -> Result<bool, RotatorError> {
        Ok(self.valid.load(Ordering::SeqCst))
    }

    async fn revoke(&self, _name: &str, _handle: &RevocationHandle) -> Result<RevokeOutcome, RotatorError> {
        self.revocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.revoke_outcome.clone())
    }

    async fn discard(&self, _name: &str, _issued: &IssuedCredential) -> Result<(), RotatorError> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
