// Keyward — Reconcile worker
//
// Single-flight: one loop owns every reconcile pass, so passes never
// overlap. Triggers that arrive mid-pass leave one pass pending.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::audit::{AuditAction, AuditLog, AuditRecord, SYSTEM_ACTOR};
use crate::catalog::Catalog;
use crate::store::{CredentialStore, ReloadSummary};
use crate::sync::{SyncEngine, SyncReport, SyncTarget};

use super::{ReconcileTrigger, WatchError};

#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub reload: ReloadSummary,
    pub sync: SyncReport,
}

pub struct Reconciler {
    store: Arc<CredentialStore>,
    catalog: Arc<Catalog>,
    engine: Arc<SyncEngine>,
    targets: Vec<SyncTarget>,
    audit: Arc<dyn AuditLog>,
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<CredentialStore>,
        catalog: Arc<Catalog>,
        engine: Arc<SyncEngine>,
        targets: Vec<SyncTarget>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            catalog,
            engine,
            targets,
            audit,
            pass: Mutex::new(()),
        }
    }

    /// Re-read the credential file, record classifications for names seen
    /// for the first time, then push whatever changed. Passes requested
    /// directly (the gateway, the CLI) queue behind the worker's.
    pub async fn run_once(&self) -> Result<PassOutcome, WatchError> {
        let _pass = self.pass.lock().await;
        let reload = self.store.reload().await?;

        // A name counts as seen only once its Classified record is written;
        // a failed append leaves it first-seen for the next pass.
        for name in &reload.first_seen {
            let decision = self.catalog.decide(name);
            self.audit.append(
                AuditRecord::new(AuditAction::Classified, name, SYSTEM_ACTOR)
                    .with_detail(format!("{} ({})", decision.classification, decision.reason)),
            )?;
            self.store.mark_recorded(name)?;
        }

        let sync = self.engine.reconcile(&self.store, &self.targets).await?;
        Ok(PassOutcome { reload, sync })
    }
}

/// Runs until the task is aborted.
pub async fn run_reconcile_worker(reconciler: Arc<Reconciler>, trigger: Arc<ReconcileTrigger>) {
    loop {
        trigger.wait().await;

        match reconciler.run_once().await {
            Ok(outcome) => tracing::info!(
                added = outcome.reload.added.len(),
                changed = outcome.reload.changed.len(),
                removed = outcome.reload.removed.len(),
                pushed = outcome.sync.pushed,
                failed = outcome.sync.failed.len(),
                "Reconcile pass finished"
            ),
            Err(e) => tracing::error!(error = %e, "Reconcile pass failed"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
