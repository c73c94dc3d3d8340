// Keyward — Credential Store
//
// The in-memory mapping of credential name → record, backed by the
// credential file (values) and the state repository (lifecycle metadata).
// Key design decision: values leave the store only as zeroizing copies, and
// every read-modify-write on a name happens under that name's lock.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use zeroize::Zeroizing;

use super::envfile;
use super::models::{
    Annotate, Classification, CredentialMetadata, CredentialRecord, CredentialRole,
    CredentialStatus, PersistedState, SecurityTier,
};
use super::state::StateRepository;
use super::StoreError;

// ─── Locking ─────────────────────────────────────────────────────────────────

/// Proof that the holder owns the per-name lock for `name`.
pub struct NameGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl NameGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// What a reload changed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    /// Loaded names whose first sighting has not been recorded yet. They
    /// stay here on every reload until [`CredentialStore::mark_recorded`].
    pub first_seen: Vec<String>,
}

impl ReloadSummary {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// A point-in-time copy of one entry, as the sync engine consumes it.
pub struct StoreEntry {
    pub name: String,
    pub classification: Classification,
    value: Zeroizing<String>,
}

impl StoreEntry {
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for StoreEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEntry")
            .field("name", &self.name)
            .field("classification", &self.classification)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

pub struct CredentialStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, CredentialRecord>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    annotator: Arc<dyn Annotate>,
    state: StateRepository,
    unrecorded: StdMutex<BTreeSet<String>>,
}

impl CredentialStore {
    /// Create an empty store over `path`. Call [`reload`](Self::reload) to
    /// populate it.
    pub fn new(path: impl Into<PathBuf>, annotator: Arc<dyn Annotate>, state: StateRepository) -> Self {
        Self {
            path: path.into(),
            records: RwLock::new(BTreeMap::new()),
            locks: DashMap::new(),
            annotator,
            state,
            unrecorded: StdMutex::new(BTreeSet::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the per-name lock. Locks on different names never contend.
    pub async fn lock(&self, name: &str) -> NameGuard {
        let guard = self.name_lock(name).lock_owned().await;
        NameGuard {
            name: name.to_string(),
            _guard: guard,
        }
    }

    fn try_lock(&self, name: &str) -> Option<NameGuard> {
        self.name_lock(name).try_lock_owned().ok().map(|guard| NameGuard {
            name: name.to_string(),
            _guard: guard,
        })
    }

    fn read_records(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, CredentialRecord>>, StoreError> {
        self.records.read().map_err(|_| StoreError::Poisoned)
    }

    fn write_records(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, CredentialRecord>>, StoreError> {
        self.records.write().map_err(|_| StoreError::Poisoned)
    }

    // ─── Reload ──────────────────────────────────────────────────────────────

    /// Re-read the credential file and apply the differences. Each added,
    /// changed or removed name is applied under its own lock. A name whose
    /// lock was held by someone else (a rotation staging a value) is applied
    /// from a fresh read of the file taken after the lock is acquired.
    pub async fn reload(&self) -> Result<ReloadSummary, StoreError> {
        let mut entries = envfile::read(&self.path)?;
        let persisted = self.state.load_all()?;
        let now = Utc::now();

        let mut summary = ReloadSummary::default();

        let (candidates, removed): (Vec<String>, Vec<String>) = {
            let records = self.read_records()?;
            let mut candidates = Vec::new();
            for (name, value) in &entries {
                match records.get(name) {
                    Some(rec) if rec.value() == value.as_str() => summary.unchanged += 1,
                    _ => candidates.push(name.clone()),
                }
            }
            let removed = records
                .keys()
                .filter(|n| !entries.contains_key(*n))
                .cloned()
                .collect();
            (candidates, removed)
        };

        for name in candidates {
            let guard = match self.try_lock(&name) {
                Some(g) => g,
                None => {
                    let g = self.lock(&name).await;
                    entries = envfile::read(&self.path)?;
                    g
                }
            };

            let Some(value) = entries.get(&name).cloned() else {
                continue;
            };
            self.apply_entry(&guard, value, persisted.get(&name), now, &mut summary)?;
        }

        for name in removed {
            let _guard = self.lock(&name).await;
            let mut records = self.write_records()?;
            if records.remove(&name).is_some() {
                tracing::info!(credential = %name, "Credential removed from file");
                summary.removed.push(name);
            }
        }

        {
            let records = self.read_records()?;
            let mut unrecorded = self.unrecorded.lock().map_err(|_| StoreError::Poisoned)?;
            unrecorded.retain(|n| records.contains_key(n));
            summary.first_seen = unrecorded.iter().cloned().collect();
        }

        if !summary.is_noop() {
            tracing::info!(
                added = summary.added.len(),
                changed = summary.changed.len(),
                removed = summary.removed.len(),
                unchanged = summary.unchanged,
                "Credential store reloaded"
            );
        }

        Ok(summary)
    }

    fn apply_entry(
        &self,
        guard: &NameGuard,
        value: Zeroizing<String>,
        persisted: Option<&PersistedState>,
        now: DateTime<Utc>,
        summary: &mut ReloadSummary,
    ) -> Result<(), StoreError> {
        let name = guard.name();
        let mut records = self.write_records()?;

        if let Some(rec) = records.get_mut(name) {
            if rec.value() == value.as_str() {
                summary.unchanged += 1;
            } else {
                rec.set_value(value);
                tracing::info!(credential = %name, "Credential value changed on disk");
                summary.changed.push(name.to_string());
            }
            return Ok(());
        }

        let annotation = self.annotator.annotate(name);
        let mut record = CredentialRecord::new(name.to_string(), value, annotation, now);
        match persisted {
            Some(state) => record.apply_state(state),
            None => {
                self.unrecorded
                    .lock()
                    .map_err(|_| StoreError::Poisoned)?
                    .insert(name.to_string());
            }
        }

        tracing::debug!(
            credential = %name,
            classification = %record.classification,
            tier = %record.security_tier,
            "Credential loaded"
        );
        records.insert(name.to_string(), record);
        summary.added.push(name.to_string());
        Ok(())
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub fn contains(&self, name: &str) -> bool {
        self.read_records().map(|r| r.contains_key(name)).unwrap_or(false)
    }

    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_records()?.keys().cloned().collect())
    }

    /// A zeroizing copy of the current value.
    pub fn value(&self, name: &str) -> Result<Zeroizing<String>, StoreError> {
        let records = self.read_records()?;
        records
            .get(name)
            .map(|r| Zeroizing::new(r.value().to_string()))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn metadata(&self, name: &str) -> Result<CredentialMetadata, StoreError> {
        let records = self.read_records()?;
        records
            .get(name)
            .map(|r| r.metadata())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Value-free listing, in name order.
    pub fn list_metadata(&self) -> Result<Vec<CredentialMetadata>, StoreError> {
        Ok(self.read_records()?.values().map(|r| r.metadata()).collect())
    }

    pub fn provider_key_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        let records = self.read_records()?;
        records
            .get(name)
            .map(|r| r.provider_key_id.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn has_pending_replacement(&self, name: &str) -> bool {
        self.read_records()
            .map(|r| r.get(name).map(|rec| rec.has_pending_replacement()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Copy every entry for a sync pass.
    pub fn snapshot(&self) -> Result<Vec<StoreEntry>, StoreError> {
        Ok(self
            .read_records()?
            .values()
            .map(|r| StoreEntry {
                name: r.name.clone(),
                classification: r.classification,
                value: Zeroizing::new(r.value().to_string()),
            })
            .collect())
    }

    /// Names of every Bootstrap credential currently loaded.
    pub fn bootstrap_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read_records()?
            .values()
            .filter(|r| r.role == CredentialRole::Bootstrap)
            .map(|r| r.name.clone())
            .collect())
    }

    pub fn tier(&self, name: &str) -> Result<SecurityTier, StoreError> {
        Ok(self.metadata(name)?.security_tier)
    }

    // ─── Writes ──────────────────────────────────────────────────────────────

    /// Persist the state of a first-seen name once its sighting has been
    /// recorded elsewhere. Until then every reload reports it as first seen.
    pub fn mark_recorded(&self, name: &str) -> Result<(), StoreError> {
        let state = self.read_records()?.get(name).map(|r| r.persisted_state());
        if let Some(state) = state {
            self.state.upsert(&state)?;
        }
        self.unrecorded.lock().map_err(|_| StoreError::Poisoned)?.remove(name);
        Ok(())
    }

    /// Update the lifecycle status and persist it.
    pub fn set_status(&self, name: &str, status: CredentialStatus) -> Result<(), StoreError> {
        let state = {
            let mut records = self.write_records()?;
            let rec = records
                .get_mut(name)
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            rec.status = status;
            rec.persisted_state()
        };
        self.state.upsert(&state)
    }

    /// Phase one of a replacement: write the new value to the credential file
    /// and make it current, retaining the previous value for rollback.
    pub fn stage_value(&self, guard: &NameGuard, new_value: Zeroizing<String>) -> Result<(), StoreError> {
        let name = guard.name();
        if !self.contains(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }

        envfile::update_value(&self.path, name, &new_value)?;

        let mut records = self.write_records()?;
        let rec = records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        rec.stage(new_value);

        tracing::info!(credential = %name, "Replacement value staged");
        Ok(())
    }

    /// Phase two: discard the retained previous value and record the rotation.
    pub fn confirm_replacement(
        &self,
        guard: &NameGuard,
        rotated_at: DateTime<Utc>,
        provider_key_id: Option<String>,
    ) -> Result<(), StoreError> {
        let name = guard.name();
        let state = {
            let mut records = self.write_records()?;
            let rec = records
                .get_mut(name)
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            if rec.take_previous().is_none() {
                return Err(StoreError::NoPendingReplacement(name.to_string()));
            }
            rec.last_rotated_at = Some(rotated_at);
            rec.status = CredentialStatus::Active;
            if provider_key_id.is_some() {
                rec.provider_key_id = provider_key_id;
            }
            rec.persisted_state()
        };
        self.state.upsert(&state)?;

        tracing::info!(credential = %name, "Replacement confirmed");
        Ok(())
    }

    /// Undo a staged replacement: the previous value becomes current again,
    /// both in memory and in the credential file.
    pub fn restore_previous(&self, guard: &NameGuard) -> Result<(), StoreError> {
        let name = guard.name();
        let previous = {
            let mut records = self.write_records()?;
            let rec = records
                .get_mut(name)
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            rec.take_previous()
                .ok_or_else(|| StoreError::NoPendingReplacement(name.to_string()))?
        };

        envfile::update_value(&self.path, name, &previous)?;

        let mut records = self.write_records()?;
        if let Some(rec) = records.get_mut(name) {
            rec.set_value(previous);
        }

        tracing::warn!(credential = %name, "Staged replacement rolled back to previous value");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Annotation;
    use crate::store::SharedDatabase;

    /// Names ending in `_KEY` are secrets, everything else a setting.
    struct SuffixAnnotator;

    impl Annotate for SuffixAnnotator {
        fn annotate(&self, name: &str) -> Annotation {
            let secret = name.ends_with("_KEY");
            Annotation {
                classification: if secret { Classification::Secret } else { Classification::Setting },
                provider: None,
                security_tier: SecurityTier::Standard,
                role: if name.starts_with("ADMIN_") { CredentialRole::Bootstrap } else { CredentialRole::Standard },
            }
        }
    }

    fn setup(contents: &str) -> (tempfile::TempDir, CredentialStore, StateRepository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, contents).unwrap();
        let state = StateRepository::new(SharedDatabase::in_memory());
        let store = CredentialStore::new(path, Arc::new(SuffixAnnotator), state.clone());
        (dir, store, state)
    }

    #[tokio::test]
    async fn test_initial_reload_adds_everything() {
        let (_dir, store, state) = setup("OPENAI_API_KEY=sk-1\nPORT=3000\n");
        let summary = store.reload().await.unwrap();

        assert_eq!(summary.added, vec!["OPENAI_API_KEY", "PORT"]);
        assert_eq!(summary.first_seen, vec!["OPENAI_API_KEY", "PORT"]);
        assert_eq!(store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-1");
        assert_eq!(
            store.metadata("PORT").unwrap().classification,
            Classification::Setting
        );
        assert!(state.get("PORT").unwrap().is_none(), "Nothing persisted until recorded");

        store.mark_recorded("PORT").unwrap();
        assert!(state.get("PORT").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_first_seen_repeats_until_recorded() {
        let (dir, store, _state) = setup("A_KEY=1\n");
        store.reload().await.unwrap();

        let again = store.reload().await.unwrap();
        assert!(again.is_noop());
        assert_eq!(again.first_seen, vec!["A_KEY"]);

        store.mark_recorded("A_KEY").unwrap();
        assert!(store.reload().await.unwrap().first_seen.is_empty());

        std::fs::write(dir.path().join(".env"), "A_KEY=1\nB_KEY=2\n").unwrap();
        assert_eq!(store.reload().await.unwrap().first_seen, vec!["B_KEY"]);
    }

    #[tokio::test]
    async fn test_second_reload_is_noop() {
        let (_dir, store, _state) = setup("A_KEY=1\n");
        store.reload().await.unwrap();
        let summary = store.reload().await.unwrap();
        assert!(summary.is_noop());
        assert_eq!(summary.unchanged, 1);
    }

    #[tokio::test]
    async fn test_reload_detects_change_and_removal() {
        let (dir, store, _state) = setup("A_KEY=1\nB_KEY=2\n");
        store.reload().await.unwrap();

        std::fs::write(dir.path().join(".env"), "A_KEY=changed\n").unwrap();
        let summary = store.reload().await.unwrap();

        assert_eq!(summary.changed, vec!["A_KEY"]);
        assert_eq!(summary.removed, vec!["B_KEY"]);
        assert_eq!(store.value("A_KEY").unwrap().as_str(), "changed");
        assert!(!store.contains("B_KEY"));
    }

    #[tokio::test]
    async fn test_persisted_state_survives_restart() {
        let (dir, store, state) = setup("A_KEY=1\n");
        store.reload().await.unwrap();
        store.mark_recorded("A_KEY").unwrap();
        store.set_status("A_KEY", CredentialStatus::RotationFailed).unwrap();

        let restarted = CredentialStore::new(dir.path().join(".env"), Arc::new(SuffixAnnotator), state);
        let summary = restarted.reload().await.unwrap();

        assert!(summary.first_seen.is_empty());
        assert_eq!(
            restarted.metadata("A_KEY").unwrap().status,
            CredentialStatus::RotationFailed
        );
    }

    #[tokio::test]
    async fn test_stage_confirm_updates_file_and_state() {
        let (dir, store, state) = setup("# comment\nA_KEY=old\nPORT=1\n");
        store.reload().await.unwrap();

        let guard = store.lock("A_KEY").await;
        store.stage_value(&guard, Zeroizing::new("new".to_string())).unwrap();
        assert!(store.has_pending_replacement("A_KEY"));

        let at = Utc::now();
        store.confirm_replacement(&guard, at, Some("key_9".to_string())).unwrap();
        drop(guard);

        assert!(!store.has_pending_replacement("A_KEY"));
        assert_eq!(store.value("A_KEY").unwrap().as_str(), "new");
        let on_disk = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(on_disk, "# comment\nA_KEY=new\nPORT=1\n");

        let persisted = state.get("A_KEY").unwrap().unwrap();
        assert_eq!(persisted.last_rotated_at.map(|t| t.timestamp()), Some(at.timestamp()));
        assert_eq!(persisted.provider_key_id.as_deref(), Some("key_9"));
    }

    #[tokio::test]
    async fn test_restore_previous_reverts_file_and_memory() {
        let (dir, store, _state) = setup("A_KEY=old\n");
        store.reload().await.unwrap();

        let guard = store.lock("A_KEY").await;
        store.stage_value(&guard, Zeroizing::new("new".to_string())).unwrap();
        store.restore_previous(&guard).unwrap();
        drop(guard);

        assert_eq!(store.value("A_KEY").unwrap().as_str(), "old");
        let entries = envfile::read(&dir.path().join(".env")).unwrap();
        assert_eq!(entries["A_KEY"].as_str(), "old");
        assert!(store.metadata("A_KEY").unwrap().last_rotated_at.is_none());
    }

    #[tokio::test]
    async fn test_confirm_without_stage_fails() {
        let (_dir, store, _state) = setup("A_KEY=old\n");
        store.reload().await.unwrap();
        let guard = store.lock("A_KEY").await;
        let err = store.confirm_replacement(&guard, Utc::now(), None).unwrap_err();
        assert!(matches!(err, StoreError::NoPendingReplacement(_)));
    }

    #[tokio::test]
    async fn test_reload_waits_for_held_lock() {
        let (dir, store, _state) = setup("A_KEY=1\n");
        let store = Arc::new(store);
        store.reload().await.unwrap();

        let guard = store.lock("A_KEY").await;
        std::fs::write(dir.path().join(".env"), "A_KEY=2\n").unwrap();

        let reloader = {
            let store = store.clone();
            tokio::spawn(async move { store.reload().await })
        };

        tokio::task::yield_now().await;
        assert_eq!(store.value("A_KEY").unwrap().as_str(), "1");

        // The holder rewrites the file before releasing; reload must apply
        // what is on disk after the lock is released.
        std::fs::write(dir.path().join(".env"), "A_KEY=3\n").unwrap();
        drop(guard);

        let summary = reloader.await.unwrap().unwrap();
        assert_eq!(summary.changed, vec!["A_KEY"]);
        assert_eq!(store.value("A_KEY").unwrap().as_str(), "3");
    }

    #[tokio::test]
    async fn test_metadata_and_snapshot_never_expose_values_in_debug() {
        let (_dir, store, _state) = setup("A_KEY=super-secret-value\n");
        store.reload().await.unwrap();

        let snapshot = store.snapshot().unwrap();
        let debug = format!("{:?}", snapshot);
        assert!(!debug.contains("super-secret-value"));

        let json = serde_json::to_string(&store.list_metadata().unwrap()).unwrap();
        assert!(!json.contains("super-secret-value"));
    }

    #[tokio::test]
    async fn test_bootstrap_names() {
        let (_dir, store, _state) = setup("ADMIN_API_KEY=a\nA_KEY=b\n");
        store.reload().await.unwrap();
        assert_eq!(store.bootstrap_names().unwrap(), vec!["ADMIN_API_KEY"]);
    }
}
