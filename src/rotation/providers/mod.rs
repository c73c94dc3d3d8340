// Keyward — Concrete rotators

mod api;
mod manual;
mod session;
mod validator;

pub use api::ApiRotator;
pub use manual::ManualRotator;
pub use session::{ChallengeResponder, DeclineChallenges, SessionChallenge, SessionDriver, SessionRotator, SessionState};
pub use validator::HttpValidator;
