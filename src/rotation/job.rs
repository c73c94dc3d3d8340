// Keyward — Rotation jobs
//
// One attempt to replace one credential's value. The state machine is
// Scheduled → InProgress → Validating → Completed | Failed, and Failed may
// move to RolledBack.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::SecurityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    Scheduled,
    Emergency,
    Manual,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationReason::Scheduled => write!(f, "scheduled"),
            RotationReason::Emergency => write!(f, "emergency"),
            RotationReason::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    InProgress,
    Validating,
    Completed,
    Failed,
    RolledBack,
}

impl JobState {
    /// A provider-side mutation may be under way. Not preemptible.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::InProgress | JobState::Validating)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::RolledBack)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Scheduled => "scheduled",
            JobState::InProgress => "in_progress",
            JobState::Validating => "validating",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationJob {
    pub id: Uuid,
    pub credential_name: String,
    pub reason: RotationReason,
    pub requested_at: DateTime<Utc>,
    pub tier: SecurityTier,
    pub state: JobState,
    /// Who asked for the job, or who last acted on it.
    pub actor: String,
    /// Held in Scheduled until an approval signal arrives.
    pub awaiting_approval: bool,
    /// InProgress and waiting for `complete_manual_rotation`.
    pub awaiting_manual: bool,
    pub failure: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RotationJob {
    pub fn new(
        credential_name: impl Into<String>,
        reason: RotationReason,
        tier: SecurityTier,
        actor: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            credential_name: credential_name.into(),
            reason,
            requested_at: now,
            tier,
            state: JobState::Scheduled,
            actor: actor.into(),
            awaiting_approval: false,
            awaiting_manual: false,
            failure: None,
            updated_at: now,
        }
    }

    pub(crate) fn transition(&mut self, state: JobState) {
        tracing::debug!(
            credential = %self.credential_name,
            job = %self.id,
            from = %self.state,
            to = %state,
            "Job transition"
        );
        self.state = state;
        self.updated_at = Utc::now();
    }
}

impl fmt::Display for RotationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} ({}, {})",
            self.credential_name, self.tier, self.state, self.reason, self.actor
        )?;
        if self.awaiting_approval {
            write!(f, " awaiting approval")?;
        }
        if self.awaiting_manual {
            write!(f, " awaiting manual value")?;
        }
        if let Some(reason) = &self.failure {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_scheduled() {
        let job = RotationJob::new("OPENAI_API_KEY", RotationReason::Scheduled, SecurityTier::Standard, "keyward");
        assert_eq!(job.state, JobState::Scheduled);
        assert!(!job.state.is_active());
        assert!(!job.state.is_terminal());
    }

    #[test]
    fn test_state_classes() {
        assert!(JobState::InProgress.is_active());
        assert!(JobState::Validating.is_active());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::RolledBack.is_terminal());
        assert_eq!(JobState::InProgress.to_string(), "in_progress");
    }
}
