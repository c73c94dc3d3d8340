// Keyward — Rotation scheduler
//
// Owns the job table and drives every job through the state machine.
// Invariants:
//   - at most one job per credential name is InProgress or Validating
//   - a value is adopted only after validation succeeded
//   - a state transition is complete only once its audit record is written
//   - the old value is revoked only after the new one is adopted and audited

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use zeroize::Zeroizing;

use super::job::{JobState, RotationJob, RotationReason};
use super::policy::{PolicyVerdict, RotationPolicy};
use super::registry::RotatorRegistry;
use super::rotator::{IssuedCredential, ProviderRotator, RevocationHandle, RevokeOutcome, RotationOutcome, RotationRequest};
use super::RotationError;
use crate::alerts::{notify_best_effort, Notification, NotificationKind};
use crate::audit::{AuditAction, AuditLog, AuditRecord, SYSTEM_ACTOR};
use crate::context::EngineContext;
use crate::retry::retry;
use crate::store::envfile;
use crate::store::{Classification, CredentialMetadata, CredentialRole, CredentialStatus, CredentialStore, SecurityTier};
use crate::sync::SyncTrigger;

/// What one policy evaluation did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    pub started: Vec<String>,
    pub awaiting_approval: Vec<String>,
    pub upcoming: Vec<String>,
}

#[derive(Default)]
struct JobTable {
    current: HashMap<String, RotationJob>,
    /// Values issued by a provider but never adopted, kept for rollback.
    issued: HashMap<String, IssuedCredential>,
    /// Due date each upcoming notice was last sent for.
    upcoming_sent: HashMap<String, DateTime<Utc>>,
    history: VecDeque<RotationJob>,
    history_cap: usize,
}

impl JobTable {
    fn insert(&mut self, job: RotationJob) {
        if let Some(old) = self.current.insert(job.credential_name.clone(), job) {
            self.history.push_back(old);
            while self.history.len() > self.history_cap {
                self.history.pop_front();
            }
        }
    }
}

/// Result of a rotation request, before dispatch.
enum Admission {
    Existing(RotationJob),
    Gated(RotationJob),
    /// Moved to InProgress under the same lock that admitted it.
    Claimed(RotationJob, bool),
}

pub struct Scheduler {
    ctx: Arc<EngineContext>,
    store: Arc<CredentialStore>,
    registry: Arc<RotatorRegistry>,
    policy: RotationPolicy,
    audit: Arc<dyn AuditLog>,
    sync: Arc<dyn SyncTrigger>,
    slots: Arc<Semaphore>,
    table: Mutex<JobTable>,
    changed: Notify,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<EngineContext>,
        store: Arc<CredentialStore>,
        registry: Arc<RotatorRegistry>,
        policy: RotationPolicy,
        audit: Arc<dyn AuditLog>,
        sync: Arc<dyn SyncTrigger>,
        max_in_flight: usize,
        job_history: usize,
    ) -> Self {
        Self {
            ctx,
            store,
            registry,
            policy,
            audit,
            sync,
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            table: Mutex::new(JobTable {
                history_cap: job_history,
                ..JobTable::default()
            }),
            changed: Notify::new(),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, JobTable>, RotationError> {
        self.table.lock().map_err(|_| RotationError::Poisoned)
    }

    /// Apply `f` to the current job for `name` and wake anyone waiting on
    /// job changes.
    fn update<T>(&self, name: &str, f: impl FnOnce(&mut RotationJob) -> T) -> Result<T, RotationError> {
        let result = {
            let mut table = self.table()?;
            let job = table
                .current
                .get_mut(name)
                .ok_or_else(|| RotationError::NoJob(name.to_string()))?;
            f(job)
        };
        self.changed.notify_waiters();
        Ok(result)
    }

    fn needs_approval(&self, meta: &CredentialMetadata, reason: RotationReason) -> bool {
        if meta.role == CredentialRole::Bootstrap {
            return true;
        }
        match reason {
            RotationReason::Emergency => false,
            RotationReason::Scheduled | RotationReason::Manual => {
                self.policy.tier_policy(meta.security_tier).approval_required
            }
        }
    }

    fn rotator_for(&self, name: &str) -> Result<(String, Arc<dyn ProviderRotator>), RotationError> {
        let provider = self
            .store
            .metadata(name)
            .map_err(|_| RotationError::UnknownCredential(name.to_string()))?
            .provider
            .ok_or_else(|| RotationError::NoProvider(name.to_string()))?;
        let rotator = self
            .registry
            .get(&provider)
            .ok_or_else(|| RotationError::NoProvider(name.to_string()))?;
        Ok((provider, rotator))
    }

    async fn notify(&self, kind: NotificationKind, name: &str, tier: SecurityTier, reason: impl Into<String>) {
        notify_best_effort(
            self.ctx.notifier.as_ref(),
            Notification::new(kind, name, Some(tier), reason),
        )
        .await;
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub fn job(&self, name: &str) -> Option<RotationJob> {
        self.table().ok()?.current.get(name).cloned()
    }

    /// Current job per credential, in name order.
    pub fn jobs(&self) -> Result<Vec<RotationJob>, RotationError> {
        let table = self.table()?;
        let mut jobs: Vec<RotationJob> = table.current.values().cloned().collect();
        jobs.sort_by(|a, b| a.credential_name.cmp(&b.credential_name));
        Ok(jobs)
    }

    /// Replaced jobs, oldest first, bounded by the configured history size.
    pub fn history(&self) -> Result<Vec<RotationJob>, RotationError> {
        Ok(self.table()?.history.iter().cloned().collect())
    }

    /// Wait until the job for `name` is no longer running: terminal, gated on
    /// approval, or waiting for a manual value.
    pub async fn wait_until_settled(&self, name: &str) -> Option<RotationJob> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.job(name)?;
            if !job.state.is_active() || job.awaiting_manual {
                return Some(job);
            }
            notified.await;
        }
    }

    // ─── Policy evaluation ───────────────────────────────────────────────────

    /// Schedule every credential whose cadence has elapsed and send notice
    /// for those inside their notice window.
    pub async fn evaluate(self: &Arc<Self>, now: DateTime<Utc>) -> Result<EvaluationSummary, RotationError> {
        let mut summary = EvaluationSummary::default();

        for meta in self.store.list_metadata()? {
            if meta.classification != Classification::Secret {
                continue;
            }
            let Some(provider) = &meta.provider else {
                continue;
            };
            if self.registry.get(provider).is_none() {
                continue;
            }

            // Never rotated: cadence runs from the first sighting.
            let baseline = meta.last_rotated_at.unwrap_or(meta.first_seen_at);

            match self.policy.evaluate(meta.security_tier, baseline, now) {
                PolicyVerdict::NotDue => {}
                PolicyVerdict::Upcoming { due_at } => {
                    let first_notice = {
                        let mut table = self.table()?;
                        table.upcoming_sent.insert(meta.name.clone(), due_at) != Some(due_at)
                    };
                    if first_notice {
                        self.notify(
                            NotificationKind::RotationUpcoming,
                            &meta.name,
                            meta.security_tier,
                            format!("rotation due {}", due_at.format("%Y-%m-%d")),
                        )
                        .await;
                        summary.upcoming.push(meta.name.clone());
                    }
                }
                PolicyVerdict::Due { due_at } => {
                    let Some(job) = self.schedule(&meta)? else {
                        continue;
                    };
                    tracing::info!(credential = %meta.name, tier = %meta.security_tier, due_at = %due_at, "Rotation due");

                    if job.awaiting_approval {
                        self.store.set_status(&meta.name, CredentialStatus::RotationPending)?;
                        self.notify(
                            NotificationKind::ApprovalRequired,
                            &meta.name,
                            meta.security_tier,
                            "scheduled rotation is waiting for approval",
                        )
                        .await;
                        summary.awaiting_approval.push(meta.name.clone());
                    } else {
                        match self.start(&meta.name) {
                            Ok(_) => summary.started.push(meta.name.clone()),
                            Err(e) => {
                                tracing::error!(credential = %meta.name, error = %e, "Could not start scheduled rotation")
                            }
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Create a Scheduled job for a due credential, unless one is already
    /// queued, running, or waiting on a human after a failure.
    fn schedule(&self, meta: &CredentialMetadata) -> Result<Option<RotationJob>, RotationError> {
        let mut table = self.table()?;
        let holds_issued = table.issued.contains_key(&meta.name);

        if let Some(existing) = table.current.get(&meta.name) {
            match existing.state {
                JobState::Scheduled | JobState::InProgress | JobState::Validating => return Ok(None),
                // High tier never auto-retries; an unadopted value must be
                // rolled back first.
                JobState::Failed if existing.tier == SecurityTier::High || holds_issued => return Ok(None),
                _ => {}
            }
        }

        let mut job = RotationJob::new(&meta.name, RotationReason::Scheduled, meta.security_tier, SYSTEM_ACTOR);
        job.awaiting_approval = self.needs_approval(meta, RotationReason::Scheduled);
        table.insert(job.clone());
        drop(table);

        self.changed.notify_waiters();
        Ok(Some(job))
    }

    // ─── Admission ───────────────────────────────────────────────────────────

    /// Scheduled → InProgress. Callers hold the table lock, so two
    /// admissions for the same name can never both succeed.
    fn claim(table: &mut JobTable, name: &str) -> Result<(RotationJob, bool), RotationError> {
        let job = table
            .current
            .get_mut(name)
            .ok_or_else(|| RotationError::NoJob(name.to_string()))?;
        if job.state.is_active() {
            return Err(RotationError::Conflict {
                name: name.to_string(),
                state: job.state,
            });
        }
        if job.state != JobState::Scheduled {
            return Err(RotationError::InvalidState {
                name: name.to_string(),
                state: job.state,
                expected: "only scheduled jobs can start",
            });
        }
        let was_gated = job.awaiting_approval;
        job.awaiting_approval = false;
        job.transition(JobState::InProgress);
        Ok((job.clone(), was_gated))
    }

    /// Audit a claimed job's start; the claim is reverted if the record
    /// cannot be written.
    fn record_start(&self, name: &str, job: RotationJob, was_gated: bool) -> Result<RotationJob, RotationError> {
        let record = AuditRecord::new(AuditAction::RotationStarted, name, &job.actor)
            .with_detail(format!("reason={} tier={}", job.reason, job.tier));
        if let Err(e) = self.audit.append(record) {
            let _ = self.update(name, |j| {
                if j.id == job.id {
                    j.awaiting_approval = was_gated;
                    j.transition(JobState::Scheduled);
                }
            });
            tracing::error!(credential = %name, error = %e, "Rotation not started: audit write failed");
            return Err(e.into());
        }

        self.store.set_status(name, CredentialStatus::Rotating)?;
        self.changed.notify_waiters();
        tracing::info!(credential = %name, job = %job.id, reason = %job.reason, "Rotation started");
        Ok(job)
    }

    /// Admit and hand the job to a background driver.
    fn start(self: &Arc<Self>, name: &str) -> Result<RotationJob, RotationError> {
        let (job, was_gated) = Self::claim(&mut *self.table()?, name)?;
        self.launch(name, job, was_gated)
    }

    fn launch(self: &Arc<Self>, name: &str, job: RotationJob, was_gated: bool) -> Result<RotationJob, RotationError> {
        let job = self.record_start(name, job, was_gated)?;
        tokio::spawn(Arc::clone(self).drive(name.to_string()));
        Ok(job)
    }

    // ─── Entry points ────────────────────────────────────────────────────────

    /// Manual or emergency request. An emergency replaces a queued job and
    /// bypasses approval, except for Bootstrap credentials.
    pub async fn request_rotation(
        self: &Arc<Self>,
        name: &str,
        reason: RotationReason,
        actor: &str,
    ) -> Result<RotationJob, RotationError> {
        let meta = self
            .store
            .metadata(name)
            .map_err(|_| RotationError::UnknownCredential(name.to_string()))?;
        if meta.classification == Classification::Setting {
            return Err(RotationError::NotRotatable(name.to_string()));
        }
        self.rotator_for(name)?;

        let gated = self.needs_approval(&meta, reason);

        let admission = {
            let mut table = self.table()?;
            let holds_issued = table.issued.contains_key(name);

            match table.current.get(name).map(|j| j.state) {
                Some(state) if state.is_active() => Err(RotationError::Conflict {
                    name: name.to_string(),
                    state,
                }),
                Some(JobState::Scheduled) if reason == RotationReason::Emergency => {
                    if let Some(job) = table.current.get_mut(name) {
                        job.reason = RotationReason::Emergency;
                        job.requested_at = Utc::now();
                        job.actor = actor.to_string();
                        job.awaiting_approval = gated;
                        job.transition(JobState::Scheduled);
                    }
                    if gated {
                        table
                            .current
                            .get(name)
                            .cloned()
                            .map(Admission::Gated)
                            .ok_or_else(|| RotationError::NoJob(name.to_string()))
                    } else {
                        Self::claim(&mut table, name).map(|(job, was_gated)| Admission::Claimed(job, was_gated))
                    }
                }
                Some(JobState::Scheduled) => table
                    .current
                    .get(name)
                    .cloned()
                    .map(Admission::Existing)
                    .ok_or_else(|| RotationError::NoJob(name.to_string())),
                Some(JobState::Failed) if holds_issued => Err(RotationError::InvalidState {
                    name: name.to_string(),
                    state: JobState::Failed,
                    expected: "roll back the failed job before requesting another",
                }),
                _ => {
                    let mut job = RotationJob::new(name, reason, meta.security_tier, actor);
                    job.awaiting_approval = gated;
                    table.insert(job.clone());
                    if gated {
                        Ok(Admission::Gated(job))
                    } else {
                        Self::claim(&mut table, name).map(|(job, was_gated)| Admission::Claimed(job, was_gated))
                    }
                }
            }
        };
        self.changed.notify_waiters();

        match admission {
            Err(RotationError::Conflict { name, state }) => {
                tracing::error!(credential = %name, state = %state, "Rotation conflict");
                self.notify(
                    NotificationKind::RotationConflict,
                    &name,
                    meta.security_tier,
                    format!("{} rotation requested while a job is {}", reason, state),
                )
                .await;
                Err(RotationError::Conflict { name, state })
            }
            Err(e) => Err(e),
            Ok(Admission::Existing(job)) => Ok(job),
            Ok(Admission::Gated(job)) => {
                self.store.set_status(name, CredentialStatus::RotationPending)?;
                self.notify(
                    NotificationKind::ApprovalRequired,
                    name,
                    meta.security_tier,
                    format!("{} rotation requested by {} is waiting for approval", reason, actor),
                )
                .await;
                Ok(job)
            }
            Ok(Admission::Claimed(job, was_gated)) => self.launch(name, job, was_gated),
        }
    }

    /// External approval signal for a gated job.
    pub fn approve(self: &Arc<Self>, name: &str, actor: &str) -> Result<RotationJob, RotationError> {
        self.update(name, |job| {
            if job.state != JobState::Scheduled || !job.awaiting_approval {
                return Err(RotationError::InvalidState {
                    name: name.to_string(),
                    state: job.state,
                    expected: "approval applies to a job awaiting approval",
                });
            }
            job.actor = actor.to_string();
            Ok(())
        })??;

        tracing::info!(credential = %name, actor = %actor, "Rotation approved");
        self.start(name)
    }

    /// Second phase of a manual rotation. The value goes through validation
    /// exactly like a provider-issued one.
    pub async fn complete_manual_rotation(
        &self,
        name: &str,
        value: Zeroizing<String>,
        actor: &str,
    ) -> Result<RotationJob, RotationError> {
        self.update(name, |job| {
            if job.state != JobState::InProgress || !job.awaiting_manual {
                return Err(RotationError::InvalidState {
                    name: name.to_string(),
                    state: job.state,
                    expected: "completion applies to a manual job awaiting its value",
                });
            }
            // Still awaiting a value; the operator can submit a corrected one.
            if !envfile::is_single_line(&value) {
                return Err(RotationError::ValidationFailed(name.to_string()));
            }
            job.awaiting_manual = false;
            job.actor = actor.to_string();
            Ok(())
        })??;

        let rotator = match self.rotator_for(name) {
            Ok((_, rotator)) => rotator,
            Err(e) => {
                self.fail(name, e.to_string(), None).await;
                return Err(e);
            }
        };
        self.finish(name, rotator.as_ref(), IssuedCredential::new(value, None)).await
    }

    /// Failed → RolledBack: discard the issued value and return the
    /// credential to Active on its old value.
    pub async fn rollback(&self, name: &str, actor: &str) -> Result<RotationJob, RotationError> {
        let issued = {
            let mut table = self.table()?;
            let job = table
                .current
                .get(name)
                .ok_or_else(|| RotationError::NoJob(name.to_string()))?;
            let state = job.state;
            if state != JobState::Failed {
                return Err(RotationError::InvalidState {
                    name: name.to_string(),
                    state,
                    expected: "rollback applies to a failed job",
                });
            }
            table.issued.remove(name).ok_or_else(|| RotationError::InvalidState {
                name: name.to_string(),
                state,
                expected: "there is no issued credential to discard",
            })?
        };

        let restore = |issued: IssuedCredential| {
            if let Ok(mut table) = self.table() {
                table.issued.insert(name.to_string(), issued);
            }
        };

        let rotator = match self.rotator_for(name) {
            Ok((_, rotator)) => rotator,
            Err(e) => {
                restore(issued);
                return Err(e);
            }
        };

        let policy = self.ctx.retry;
        if let Err(e) = retry(&policy, "rotator.discard", || rotator.discard(name, &issued)).await {
            restore(issued);
            return Err(e.into());
        }

        let current = self.store.value(name)?;
        let record = AuditRecord::new(AuditAction::RotationRolledBack, name, actor).with_hashes(
            Some(self.ctx.fingerprinter.fingerprint(issued.value())),
            Some(self.ctx.fingerprinter.fingerprint(&current)),
        );
        if let Err(e) = self.audit.append(record) {
            restore(issued);
            return Err(e.into());
        }

        self.store.set_status(name, CredentialStatus::Active)?;
        let job = self.update(name, |job| {
            job.actor = actor.to_string();
            job.transition(JobState::RolledBack);
            job.clone()
        })?;

        tracing::warn!(credential = %name, actor = %actor, "Rotation rolled back");
        Ok(job)
    }

    // ─── Driving ─────────────────────────────────────────────────────────────

    async fn drive(self: Arc<Self>, name: String) {
        let _permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.fail(&name, "scheduler is shutting down".to_string(), None).await;
                return;
            }
        };

        let (provider, rotator) = match self.rotator_for(&name) {
            Ok(found) => found,
            Err(e) => {
                self.fail(&name, e.to_string(), None).await;
                return;
            }
        };

        let Some(job) = self.job(&name) else {
            return;
        };
        let request = RotationRequest {
            credential_name: name.clone(),
            provider,
            tier: job.tier,
            current_key_id: self.store.provider_key_id(&name).ok().flatten(),
        };

        let policy = self.ctx.retry;
        match retry(&policy, "rotator.rotate", || rotator.rotate(&request)).await {
            Ok(RotationOutcome::Issued(issued)) => {
                // Failures are recorded on the job by `finish`.
                let _ = self.finish(&name, rotator.as_ref(), issued).await;
            }
            Ok(RotationOutcome::Pending) => {
                let _ = self.update(&name, |job| job.awaiting_manual = true);
                tracing::info!(credential = %name, "Waiting for a manually supplied value");
            }
            Err(e) => self.fail(&name, format!("provider error: {}", e), None).await,
        }
    }

    /// Validating → Completed | Failed.
    async fn finish(
        &self,
        name: &str,
        rotator: &dyn ProviderRotator,
        issued: IssuedCredential,
    ) -> Result<RotationJob, RotationError> {
        if !envfile::is_single_line(issued.value()) {
            self.fail(name, "new value spans more than one line".to_string(), Some(issued)).await;
            return Err(RotationError::ValidationFailed(name.to_string()));
        }

        let tier = self.update(name, |job| {
            job.transition(JobState::Validating);
            job.tier
        })?;
        if let Err(e) = self.store.set_status(name, CredentialStatus::Validating) {
            self.fail(name, e.to_string(), Some(issued)).await;
            return Err(e.into());
        }

        let policy = self.ctx.retry;
        match retry(&policy, "rotator.validate", || rotator.validate(name, issued.value())).await {
            Ok(true) => {}
            Ok(false) => {
                self.fail(name, "new value failed validation".to_string(), Some(issued)).await;
                return Err(RotationError::ValidationFailed(name.to_string()));
            }
            Err(e) => {
                self.fail(name, format!("validation error: {}", e), Some(issued)).await;
                return Err(e.into());
            }
        }

        let old_hash = self.store.value(name).map(|v| self.ctx.fingerprinter.fingerprint(&v)).ok();
        let new_hash = self.ctx.fingerprinter.fingerprint(issued.value());
        let old_key_id = self.store.provider_key_id(name).ok().flatten();

        let validated = AuditRecord::new(AuditAction::RotationValidated, name, SYSTEM_ACTOR)
            .with_hashes(old_hash.clone(), Some(new_hash.clone()));
        if let Err(e) = self.audit.append(validated) {
            self.fail(name, format!("audit write failed: {}", e), Some(issued)).await;
            return Err(e.into());
        }

        let actor = self.job(name).map(|j| j.actor).unwrap_or_else(|| SYSTEM_ACTOR.to_string());
        {
            let guard = self.store.lock(name).await;

            if let Err(e) = self.store.stage_value(&guard, Zeroizing::new(issued.value().to_string())) {
                drop(guard);
                self.fail(name, format!("could not write new value: {}", e), Some(issued)).await;
                return Err(e.into());
            }

            let completed = AuditRecord::new(AuditAction::RotationCompleted, name, &actor)
                .with_hashes(old_hash, Some(new_hash));
            if let Err(e) = self.audit.append(completed) {
                if let Err(restore) = self.store.restore_previous(&guard) {
                    tracing::error!(credential = %name, error = %restore, "Could not restore previous value");
                }
                drop(guard);
                self.fail(name, format!("audit write failed: {}", e), Some(issued)).await;
                return Err(e.into());
            }

            if let Err(e) = self.store.confirm_replacement(&guard, Utc::now(), issued.key_id.clone()) {
                tracing::error!(credential = %name, error = %e, "New value adopted but its state was not persisted");
            }
        }

        self.revoke_previous(name, tier, rotator, old_key_id).await;

        let job = self.update(name, |job| {
            job.failure = None;
            job.transition(JobState::Completed);
            job.clone()
        })?;
        if let Ok(mut table) = self.table() {
            table.upcoming_sent.remove(name);
        }

        tracing::info!(credential = %name, job = %job.id, "Rotation completed");
        self.sync.trigger();
        Ok(job)
    }

    async fn revoke_previous(
        &self,
        name: &str,
        tier: SecurityTier,
        rotator: &dyn ProviderRotator,
        key_id: Option<String>,
    ) {
        let handle = RevocationHandle { key_id };
        let policy = self.ctx.retry;

        let skipped = match retry(&policy, "rotator.revoke", || rotator.revoke(name, &handle)).await {
            Ok(RevokeOutcome::Revoked) => {
                tracing::info!(credential = %name, "Previous value revoked");
                None
            }
            Ok(RevokeOutcome::NotSupported) => {
                tracing::debug!(credential = %name, "Provider has no revocation step");
                None
            }
            Ok(RevokeOutcome::Skipped(reason)) => Some(reason),
            Err(e) => Some(format!("revocation failed: {}", e)),
        };

        if let Some(reason) = skipped {
            tracing::warn!(credential = %name, reason = %reason, "Previous value was not revoked");
            self.notify(NotificationKind::RevocationSkipped, name, tier, reason).await;
        }
    }

    /// → Failed. Never revokes anything. The failure is audited before the
    /// job leaves its running state; if the audit write cannot be made the
    /// job still fails and the operator is told the record is missing.
    async fn fail(&self, name: &str, reason: String, issued: Option<IssuedCredential>) {
        let Some(actor) = self.job(name).map(|j| j.actor) else {
            return;
        };

        let record = AuditRecord::new(AuditAction::RotationFailed, name, &actor).with_detail(reason.as_str());
        let policy = self.ctx.retry;
        let audited = retry(&policy, "audit.append", || {
            let record = record.clone();
            async move { self.audit.append(record) }
        })
        .await;

        let reason = match audited {
            Ok(_) => reason,
            Err(e) => {
                tracing::error!(credential = %name, error = %e, "Could not audit rotation failure");
                format!("{} (audit write failed: {})", reason, e)
            }
        };

        let job = {
            let Ok(mut table) = self.table() else {
                tracing::error!(credential = %name, "Job table poisoned while recording failure");
                return;
            };
            if let Some(issued) = issued {
                table.issued.insert(name.to_string(), issued);
            }
            let Some(job) = table.current.get_mut(name) else {
                return;
            };
            job.failure = Some(reason.clone());
            job.awaiting_manual = false;
            job.transition(JobState::Failed);
            job.clone()
        };
        self.changed.notify_waiters();

        if let Err(e) = self.store.set_status(name, CredentialStatus::RotationFailed) {
            tracing::error!(credential = %name, error = %e, "Could not persist failed status");
        }

        tracing::error!(credential = %name, tier = %job.tier, reason = %reason, "Rotation failed");
        self.notify(NotificationKind::RotationFailed, name, job.tier, reason).await;

        if job.tier == SecurityTier::High {
            self.notify(
                NotificationKind::ApprovalRequired,
                name,
                job.tier,
                "high-tier rotation failed; a new attempt needs a human",
            )
            .await;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditQuery, SqliteAuditLog};
    use crate::config::Config;
    use crate::store::SharedDatabase;
    use crate::testing::{
        loaded_store_with, CountingTrigger, FailingAuditLog, FlakyAuditLog, RecordingNotifier,
        ScriptedRotator,
    };
    use chrono::Duration;

    const CONFIG: &str = r#"
bootstrap = ["OPENAI_ADMIN_KEY"]

[[tier_assignments]]
pattern = "STRIPE_*"
tier = "high"

[[providers]]
key = "openai"
strategy = "manual"
credentials = ["OPENAI_*"]

[[providers]]
key = "stripe"
strategy = "manual"
credentials = ["STRIPE_*"]
"#;

    const ENV: &str = "OPENAI_API_KEY=sk-old\nOPENAI_ADMIN_KEY=admin-old\nSTRIPE_SECRET_KEY=rk-old\nPORT=3000\n";

    struct Harness {
        scheduler: Arc<Scheduler>,
        store: Arc<CredentialStore>,
        rotator: Arc<ScriptedRotator>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<RecordingNotifier>,
        trigger: Arc<CountingTrigger>,
        _dir: tempfile::TempDir,
    }

    async fn harness_with(rotator: ScriptedRotator, audit: Arc<dyn AuditLog>) -> Harness {
        let config = Config::from_toml(CONFIG).unwrap();
        let (dir, store) = loaded_store_with(&config, ENV).await;
        let rotator = Arc::new(rotator);
        let mut registry = RotatorRegistry::new();
        registry.register("openai", rotator.clone());
        registry.register("stripe", rotator.clone());

        let notifier = Arc::new(RecordingNotifier::default());
        let trigger = Arc::new(CountingTrigger::default());
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(EngineContext::for_tests(notifier.clone())),
            store.clone(),
            Arc::new(registry),
            config.policy.clone(),
            audit.clone(),
            trigger.clone(),
            2,
            16,
        ));
        Harness {
            scheduler,
            store,
            rotator,
            audit,
            notifier,
            trigger,
            _dir: dir,
        }
    }

    async fn harness(rotator: ScriptedRotator) -> Harness {
        let audit = Arc::new(SqliteAuditLog::new(SharedDatabase::in_memory()).unwrap());
        harness_with(rotator, audit).await
    }

    fn actions(h: &Harness, name: &str) -> Vec<AuditAction> {
        h.audit
            .query(&AuditQuery::for_credential(name))
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect()
    }

    #[tokio::test]
    async fn test_due_after_cadence_runs_to_completion() {
        let h = harness(ScriptedRotator::new()).await;

        let summary = h.scheduler.evaluate(Utc::now() + Duration::days(91)).await.unwrap();
        assert_eq!(summary.started, vec!["OPENAI_API_KEY".to_string()]);
        assert_eq!(
            summary.awaiting_approval,
            vec!["OPENAI_ADMIN_KEY".to_string(), "STRIPE_SECRET_KEY".to_string()]
        );

        let job = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.reason, RotationReason::Scheduled);

        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "rotated-1");
        let on_disk = std::fs::read_to_string(h.store.path()).unwrap();
        assert!(on_disk.contains("OPENAI_API_KEY=rotated-1"));

        let meta = h.store.metadata("OPENAI_API_KEY").unwrap();
        assert_eq!(meta.status, CredentialStatus::Active);
        assert!(meta.last_rotated_at.is_some());

        assert_eq!(
            actions(&h, "OPENAI_API_KEY"),
            vec![
                AuditAction::RotationStarted,
                AuditAction::RotationValidated,
                AuditAction::RotationCompleted
            ]
        );
        let completed = h
            .audit
            .query(&AuditQuery::for_credential("OPENAI_API_KEY").action(AuditAction::RotationCompleted))
            .unwrap();
        assert!(completed[0].old_value_hash.is_some());
        assert!(completed[0].new_value_hash.is_some());
        assert_ne!(completed[0].old_value_hash, completed[0].new_value_hash);

        assert_eq!(h.rotator.revocations(), 1);
        assert_eq!(h.trigger.count(), 1);
    }

    #[tokio::test]
    async fn test_not_due_before_cadence() {
        let h = harness(ScriptedRotator::new()).await;
        let summary = h.scheduler.evaluate(Utc::now() + Duration::days(10)).await.unwrap();
        assert!(summary.started.is_empty());
        assert!(summary.upcoming.is_empty());
        assert!(h.scheduler.jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upcoming_notice_sent_once_per_due_date() {
        let h = harness(ScriptedRotator::new()).await;
        let when = Utc::now() + Duration::days(80);

        let first = h.scheduler.evaluate(when).await.unwrap();
        let second = h.scheduler.evaluate(when + Duration::hours(1)).await.unwrap();

        assert!(first.upcoming.contains(&"OPENAI_API_KEY".to_string()));
        assert!(second.upcoming.is_empty());
        let upcoming = h
            .notifier
            .all()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::RotationUpcoming && n.credential_name == "OPENAI_API_KEY")
            .count();
        assert_eq!(upcoming, 1);
    }

    #[tokio::test]
    async fn test_second_request_conflicts_while_in_progress() {
        let (rotator, gate) = ScriptedRotator::new().gated();
        let h = harness(rotator).await;

        let first = h
            .scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        assert_eq!(first.state, JobState::InProgress);

        let second = h
            .scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Emergency, "bob")
            .await;
        assert!(matches!(second, Err(RotationError::Conflict { state: JobState::InProgress, .. })));
        assert!(h.notifier.kinds().contains(&NotificationKind::RotationConflict));

        // The running job is untouched.
        assert_eq!(h.scheduler.job("OPENAI_API_KEY").unwrap().id, first.id);

        gate.add_permits(1);
        let done = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.actor, "alice");

        let started = actions(&h, "OPENAI_API_KEY")
            .into_iter()
            .filter(|a| *a == AuditAction::RotationStarted)
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_start_one_job() {
        let (rotator, gate) = ScriptedRotator::new().gated();
        let h = harness(rotator).await;
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let requests: Vec<_> = ["alice", "bob"]
            .into_iter()
            .map(|actor| {
                let scheduler = h.scheduler.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    scheduler
                        .request_rotation("OPENAI_API_KEY", RotationReason::Manual, actor)
                        .await
                })
            })
            .collect();

        let mut started = 0;
        let mut conflicts = 0;
        for request in requests {
            match request.await.unwrap() {
                Ok(job) => {
                    assert_eq!(job.state, JobState::InProgress);
                    started += 1;
                }
                Err(RotationError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((started, conflicts), (1, 1));

        gate.add_permits(1);
        let done = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(h.rotator.rotations(), 1);
        let started = actions(&h, "OPENAI_API_KEY")
            .into_iter()
            .filter(|a| *a == AuditAction::RotationStarted)
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_failure_notice_reports_missing_audit_record() {
        let audit = Arc::new(FlakyAuditLog::new(AuditAction::RotationFailed, usize::MAX));
        let h = harness_with(ScriptedRotator::new().rejecting(), audit).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        let job = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-old");
        assert_eq!(actions(&h, "OPENAI_API_KEY"), vec![AuditAction::RotationStarted]);
        let failed = h
            .notifier
            .all()
            .into_iter()
            .find(|n| n.kind == NotificationKind::RotationFailed)
            .unwrap();
        assert!(failed.reason.contains("audit write failed"), "{}", failed.reason);
    }

    #[tokio::test]
    async fn test_multi_line_issued_value_fails_without_touching_file() {
        let h = harness(ScriptedRotator::new().issuing("sk-new\nINJECTED=1")).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        let job = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-old");
        let on_disk = std::fs::read_to_string(h.store.path()).unwrap();
        assert!(!on_disk.contains("INJECTED"));
        let summary = h.store.reload().await.unwrap();
        assert!(summary.added.is_empty());
        assert!(h.store.value("INJECTED").is_err());
    }

    #[tokio::test]
    async fn test_multi_line_manual_value_is_refused() {
        let h = harness(ScriptedRotator::new().pending()).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        let result = h
            .scheduler
            .complete_manual_rotation("OPENAI_API_KEY", Zeroizing::new("sk-new\r\nPORT=1".into()), "alice")
            .await;
        assert!(matches!(result, Err(RotationError::ValidationFailed(_))));

        let job = h.scheduler.job("OPENAI_API_KEY").unwrap();
        assert_eq!(job.state, JobState::InProgress);
        assert!(job.awaiting_manual);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-old");
        assert_eq!(h.store.value("PORT").unwrap().as_str(), "3000");

        let job = h
            .scheduler
            .complete_manual_rotation("OPENAI_API_KEY", Zeroizing::new("sk-new".into()), "alice")
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_failed_validation_keeps_old_value() {
        let h = harness(ScriptedRotator::new().rejecting()).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        let job = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-old");
        assert!(std::fs::read_to_string(h.store.path()).unwrap().contains("OPENAI_API_KEY=sk-old"));
        assert_eq!(h.store.metadata("OPENAI_API_KEY").unwrap().status, CredentialStatus::RotationFailed);
        assert_eq!(h.rotator.revocations(), 0, "Nothing is revoked on failure");
        assert_eq!(
            actions(&h, "OPENAI_API_KEY"),
            vec![AuditAction::RotationStarted, AuditAction::RotationFailed]
        );
        assert!(h.notifier.kinds().contains(&NotificationKind::RotationFailed));
        assert_eq!(h.trigger.count(), 0);
    }

    #[tokio::test]
    async fn test_high_tier_waits_for_approval_and_never_auto_retries() {
        let h = harness(ScriptedRotator::new().rejecting()).await;

        let job = h
            .scheduler
            .request_rotation("STRIPE_SECRET_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert!(job.awaiting_approval);
        assert_eq!(h.rotator.rotations(), 0);

        h.scheduler.approve("STRIPE_SECRET_KEY", "carol").unwrap();
        let job = h.scheduler.wait_until_settled("STRIPE_SECRET_KEY").await.unwrap();
        assert_eq!(job.state, JobState::Failed);

        let kinds = h.notifier.kinds();
        assert!(kinds.contains(&NotificationKind::RotationFailed));
        assert_eq!(
            kinds.iter().filter(|k| **k == NotificationKind::ApprovalRequired).count(),
            2,
            "One for the request, one for the failure"
        );

        // A failed high-tier job is never requeued by the cadence check.
        h.scheduler.evaluate(Utc::now() + Duration::days(400)).await.unwrap();
        assert_eq!(h.scheduler.job("STRIPE_SECRET_KEY").unwrap().state, JobState::Failed);

        h.scheduler.rollback("STRIPE_SECRET_KEY", "carol").await.unwrap();
        h.scheduler.evaluate(Utc::now() + Duration::days(400)).await.unwrap();
        let job = h.scheduler.job("STRIPE_SECRET_KEY").unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert!(job.awaiting_approval, "Scheduled high-tier jobs still need approval");
    }

    #[tokio::test]
    async fn test_emergency_replaces_scheduled_job() {
        let h = harness(ScriptedRotator::new()).await;

        h.scheduler.evaluate(Utc::now() + Duration::days(31)).await.unwrap();
        let queued = h.scheduler.job("STRIPE_SECRET_KEY").unwrap();
        assert_eq!(queued.state, JobState::Scheduled);
        assert!(queued.awaiting_approval);

        let job = h
            .scheduler
            .request_rotation("STRIPE_SECRET_KEY", RotationReason::Emergency, "oncall")
            .await
            .unwrap();
        assert_eq!(job.id, queued.id);
        assert_eq!(job.reason, RotationReason::Emergency);
        assert_eq!(job.state, JobState::InProgress);

        let done = h.scheduler.wait_until_settled("STRIPE_SECRET_KEY").await.unwrap();
        assert_eq!(done.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_emergency_on_bootstrap_still_gated() {
        let h = harness(ScriptedRotator::new()).await;

        let job = h
            .scheduler
            .request_rotation("OPENAI_ADMIN_KEY", RotationReason::Emergency, "oncall")
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert!(job.awaiting_approval);
        assert_eq!(job.reason, RotationReason::Emergency);
        assert_eq!(h.rotator.rotations(), 0);
    }

    #[tokio::test]
    async fn test_manual_request_on_queued_job_is_idempotent() {
        let h = harness(ScriptedRotator::new()).await;

        let first = h
            .scheduler
            .request_rotation("STRIPE_SECRET_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        let second = h
            .scheduler
            .request_rotation("STRIPE_SECRET_KEY", RotationReason::Manual, "bob")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.actor, "alice");
    }

    #[tokio::test]
    async fn test_manual_completion_with_invalid_value_then_rollback() {
        let h = harness(ScriptedRotator::new().pending().rejecting()).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        let job = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();
        assert_eq!(job.state, JobState::InProgress);
        assert!(job.awaiting_manual);

        let result = h
            .scheduler
            .complete_manual_rotation("OPENAI_API_KEY", Zeroizing::new("sk-typo".into()), "alice")
            .await;
        assert!(matches!(result, Err(RotationError::ValidationFailed(_))));

        let job = h.scheduler.job("OPENAI_API_KEY").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-old");

        let rolled = h.scheduler.rollback("OPENAI_API_KEY", "alice").await.unwrap();
        assert_eq!(rolled.state, JobState::RolledBack);
        assert_eq!(h.store.metadata("OPENAI_API_KEY").unwrap().status, CredentialStatus::Active);
        assert_eq!(h.rotator.discards(), 1);
        assert_eq!(actions(&h, "OPENAI_API_KEY").last(), Some(&AuditAction::RotationRolledBack));
    }

    #[tokio::test]
    async fn test_manual_completion_with_valid_value() {
        let h = harness(ScriptedRotator::new().pending()).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        let job = h
            .scheduler
            .complete_manual_rotation("OPENAI_API_KEY", Zeroizing::new("sk-pasted".into()), "alice")
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "sk-pasted");
    }

    #[tokio::test]
    async fn test_completion_without_pending_job_is_invalid() {
        let h = harness(ScriptedRotator::new()).await;
        let result = h
            .scheduler
            .complete_manual_rotation("OPENAI_API_KEY", Zeroizing::new("x".into()), "alice")
            .await;
        assert!(matches!(result, Err(RotationError::NoJob(_))));
    }

    #[tokio::test]
    async fn test_settings_are_not_rotatable() {
        let h = harness(ScriptedRotator::new()).await;
        let result = h.scheduler.request_rotation("PORT", RotationReason::Manual, "alice").await;
        assert!(matches!(result, Err(RotationError::NotRotatable(_))));
    }

    #[tokio::test]
    async fn test_audit_failure_blocks_start() {
        let h = harness_with(ScriptedRotator::new(), Arc::new(FailingAuditLog)).await;

        let result = h
            .scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await;
        assert!(matches!(result, Err(RotationError::Audit(_))));

        let job = h.scheduler.job("OPENAI_API_KEY").unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(h.rotator.rotations(), 0);
    }

    #[tokio::test]
    async fn test_rollback_requires_failed_job() {
        let h = harness(ScriptedRotator::new()).await;
        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        let result = h.scheduler.rollback("OPENAI_API_KEY", "alice").await;
        assert!(matches!(
            result,
            Err(RotationError::InvalidState { state: JobState::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn test_skipped_revocation_is_notified() {
        let h = harness(ScriptedRotator::new().revoke_with(RevokeOutcome::Skipped("no key id".into()))).await;

        h.scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        let job = h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert!(h.notifier.kinds().contains(&NotificationKind::RevocationSkipped));
    }

    #[tokio::test]
    async fn test_new_request_after_completion_creates_new_job() {
        let h = harness(ScriptedRotator::new()).await;
        let first = h
            .scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        let second = h
            .scheduler
            .request_rotation("OPENAI_API_KEY", RotationReason::Manual, "alice")
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        h.scheduler.wait_until_settled("OPENAI_API_KEY").await.unwrap();

        assert_eq!(h.scheduler.history().unwrap().len(), 1);
        assert_eq!(h.store.value("OPENAI_API_KEY").unwrap().as_str(), "rotated-2");
    }
}
