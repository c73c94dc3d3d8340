// Keyward — Rotation Module
//
// Tiered rotation: policy evaluation, the job state machine, and the
// provider rotators that obtain and validate new values.

mod error;
mod job;
mod policy;
pub mod providers;
mod registry;
mod rotator;
mod scheduler;

pub use error::{RotationError, RotatorError};
pub use job::{JobState, RotationJob, RotationReason};
pub use policy::{PolicyVerdict, RotationPolicy, TierAssignment, TierPolicy};
pub use registry::{RotatorRegistry, SessionDrivers};
pub use rotator::{
    CredentialValidator, IssuedCredential, ProviderRotator, RevocationHandle, RevokeOutcome, RotationOutcome,
    RotationRequest,
};
pub use scheduler::{EvaluationSummary, Scheduler};
