// Keyward — Sync engine
//
// Pushes Secret entries to every configured target, only when the value
// fingerprint differs from what was last pushed there. Targets run in
// parallel; passes over the same target are serialized by a per-target lock
// so the ledger diff always reflects the remote.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::crypto::seal_for_destination;
use super::ledger::SyncLedger;
use super::remote::RemoteSecretStore;
use super::target::{SyncTarget, Visibility};
use super::{SyncError, SyncErrorKind};
use crate::alerts::{notify_best_effort, Notification, NotificationKind};
use crate::audit::{AuditAction, AuditLog, AuditRecord, SYSTEM_ACTOR};
use crate::context::EngineContext;
use crate::enclave::Fingerprint;
use crate::retry::retry;
use crate::store::{Classification, CredentialStore, StoreEntry};

/// Values that are templates, not credentials. Compared case-insensitively.
const PLACEHOLDERS: &[&str] = &["YOUR_VALUE_HERE", "needed", "required", "changeme"];

fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub destination: String,
    pub name: String,
    pub kind: SyncErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRejection {
    pub destination: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub skipped: usize,
    pub failed: Vec<SyncFailure>,
    pub rejected: Vec<TargetRejection>,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.pushed += other.pushed;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
        self.rejected.extend(other.rejected);
    }

    fn fail_all(&mut self, destination: &str, names: &[&str], error: &SyncError) {
        for name in names {
            self.failed.push(SyncFailure {
                destination: destination.to_string(),
                name: name.to_string(),
                kind: error.kind(),
                message: error.to_string(),
            });
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct SyncEngine {
    ctx: Arc<EngineContext>,
    remote: Arc<dyn RemoteSecretStore>,
    ledger: SyncLedger,
    audit: Arc<dyn AuditLog>,
    target_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncEngine {
    pub fn new(
        ctx: Arc<EngineContext>,
        remote: Arc<dyn RemoteSecretStore>,
        ledger: SyncLedger,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            ctx,
            remote,
            ledger,
            audit,
            target_locks: DashMap::new(),
        }
    }

    fn target_lock(&self, destination: &str) -> Arc<Mutex<()>> {
        self.target_locks
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Push every changed Secret to every target. Per-credential and
    /// per-target failures are reported, never propagated; only a failure to
    /// read the store aborts the pass.
    pub async fn reconcile(
        self: &Arc<Self>,
        store: &CredentialStore,
        targets: &[SyncTarget],
    ) -> Result<SyncReport, SyncError> {
        let entries = Arc::new(store.snapshot()?);
        let mut tasks = JoinSet::new();

        for target in targets {
            let engine = Arc::clone(self);
            let entries = Arc::clone(&entries);
            let target = target.clone();
            tasks.spawn(async move { engine.sync_target(&target, &entries).await });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(target_report) => report.merge(target_report),
                Err(e) => tracing::error!(error = %e, "Sync task panicked"),
            }
        }

        tracing::info!(
            targets = targets.len(),
            pushed = report.pushed,
            skipped = report.skipped,
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            "Reconcile complete"
        );
        Ok(report)
    }

    async fn reject(&self, report: &mut SyncReport, destination: &str, reason: String) {
        tracing::error!(destination = %destination, reason = %reason, "Sync target rejected");
        notify_best_effort(
            self.ctx.notifier.as_ref(),
            Notification::new(NotificationKind::TargetRejected, destination, None, reason.clone()),
        )
        .await;
        report.rejected.push(TargetRejection {
            destination: destination.to_string(),
            reason,
        });
    }

    async fn sync_target(&self, target: &SyncTarget, entries: &[StoreEntry]) -> SyncReport {
        let destination = target.destination_id.as_str();
        let lock = self.target_lock(destination);
        let _held = lock.lock().await;

        let mut report = SyncReport::default();

        if !target.is_private() {
            self.reject(&mut report, destination, format!("configured visibility is {}", target.visibility))
                .await;
            return report;
        }

        let pushed = match self.ledger.for_destination(destination) {
            Ok(pushed) => pushed,
            Err(e) => {
                let error = SyncError::from(e);
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                report.fail_all(destination, &names, &error);
                return report;
            }
        };

        let candidates = self.candidates(target, entries, &pushed, &mut report);
        if candidates.is_empty() {
            tracing::debug!(destination = %destination, skipped = report.skipped, "Target up to date");
            return report;
        }
        let candidate_names: Vec<&str> = candidates.iter().map(|(e, _)| e.name.as_str()).collect();

        let policy = self.ctx.retry;
        let visibility = retry(&policy, "remote.visibility", || self.remote.visibility(destination)).await;
        match visibility {
            Ok(Visibility::Private) => {}
            Ok(other) => {
                self.reject(&mut report, destination, format!("remote reports visibility {}", other))
                    .await;
                return report;
            }
            Err(SyncError::TargetRejected { reason, .. }) => {
                self.reject(&mut report, destination, reason).await;
                return report;
            }
            Err(e) => {
                tracing::warn!(destination = %destination, error = %e, "Could not confirm target visibility");
                report.fail_all(destination, &candidate_names, &e);
                return report;
            }
        }

        let key = match retry(&policy, "remote.public_key", || self.remote.public_key(destination)).await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(destination = %destination, error = %e, "Could not fetch destination key");
                report.fail_all(destination, &candidate_names, &e);
                return report;
            }
        };

        for (entry, fingerprint) in candidates {
            let previous = pushed.get(&entry.name).cloned();
            let result = async {
                let sealed = seal_for_destination(&key, entry.value())?;
                retry(&policy, "remote.put_secret", || {
                    self.remote.put_secret(destination, &entry.name, &sealed)
                })
                .await?;

                self.audit.append(
                    AuditRecord::new(AuditAction::Synced, &entry.name, SYSTEM_ACTOR)
                        .with_hashes(previous, Some(fingerprint.clone()))
                        .with_detail(destination),
                )?;
                self.ledger.record(destination, &entry.name, &fingerprint, Utc::now())?;
                Ok::<(), SyncError>(())
            }
            .await;

            match result {
                Ok(()) => {
                    tracing::info!(destination = %destination, credential = %entry.name, "Secret pushed");
                    report.pushed += 1;
                }
                Err(e) => {
                    tracing::warn!(destination = %destination, credential = %entry.name, error = %e, "Push failed");
                    report.failed.push(SyncFailure {
                        destination: destination.to_string(),
                        name: entry.name.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Admitted Secrets whose fingerprint differs from the ledger. Everything
    /// else is counted as skipped.
    fn candidates<'a>(
        &self,
        target: &SyncTarget,
        entries: &'a [StoreEntry],
        pushed: &HashMap<String, Fingerprint>,
        report: &mut SyncReport,
    ) -> Vec<(&'a StoreEntry, Fingerprint)> {
        let mut candidates = Vec::new();
        for entry in entries {
            if entry.classification != Classification::Secret
                || !target.admits(&entry.name)
                || is_placeholder(entry.value())
            {
                report.skipped += 1;
                continue;
            }

            let fingerprint = self.ctx.fingerprinter.fingerprint(entry.value());
            if pushed.get(&entry.name) == Some(&fingerprint) {
                report.skipped += 1;
                continue;
            }
            candidates.push((entry, fingerprint));
        }
        candidates
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
