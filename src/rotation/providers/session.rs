// Keyward — Session-strategy rotator
//
// For providers with no key-management API. A driver performs the
// interactive steps; this rotator sequences them and handles second-factor
// challenges while the session is being established.

use std::sync::Arc;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::config::ProviderStrategy;
use crate::rotation::rotator::{
    CredentialValidator, IssuedCredential, ProviderRotator, RevocationHandle, RevokeOutcome, RotationOutcome,
    RotationRequest,
};
use crate::rotation::RotatorError;

/// Challenges at most this many times before giving up on a login.
const MAX_CHALLENGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChallenge {
    SecondFactor { prompt: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Challenged(SessionChallenge),
}

/// The interactive mechanics of one provider's console.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    async fn establish(&self, provider: &str) -> Result<SessionState, RotatorError>;

    async fn answer(&self, challenge: &SessionChallenge, response: &str) -> Result<SessionState, RotatorError>;

    async fn regenerate(&self, name: &str) -> Result<(), RotatorError>;

    async fn read_value(&self, name: &str) -> Result<Zeroizing<String>, RotatorError>;

    async fn revoke_previous(&self, name: &str) -> Result<(), RotatorError>;

    async fn close(&self) {}
}

/// Supplies answers to session challenges (an authenticator, an operator).
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    async fn respond(&self, provider: &str, challenge: &SessionChallenge) -> Result<Zeroizing<String>, RotatorError>;
}

/// Refuses every challenge. Sessions that need a second factor fail.
pub struct DeclineChallenges;

#[async_trait]
impl ChallengeResponder for DeclineChallenges {
    async fn respond(&self, provider: &str, _challenge: &SessionChallenge) -> Result<Zeroizing<String>, RotatorError> {
        Err(RotatorError::Session(format!(
            "{} requires a second factor and no challenge responder is configured",
            provider
        )))
    }
}

pub struct SessionRotator<D: SessionDriver + ?Sized> {
    provider: String,
    driver: Arc<D>,
    responder: Arc<dyn ChallengeResponder>,
    validator: Option<Arc<dyn CredentialValidator>>,
}

impl<D: SessionDriver + ?Sized> SessionRotator<D> {
    pub fn new(
        provider: impl Into<String>,
        driver: Arc<D>,
        responder: Arc<dyn ChallengeResponder>,
        validator: Option<Arc<dyn CredentialValidator>>,
    ) -> Self {
        Self {
            provider: provider.into(),
            driver,
            responder,
            validator,
        }
    }

    async fn establish(&self) -> Result<(), RotatorError> {
        let mut state = self.driver.establish(&self.provider).await?;
        for _ in 0..MAX_CHALLENGES {
            match state {
                SessionState::Ready => return Ok(()),
                SessionState::Challenged(challenge) => {
                    tracing::info!(provider = %self.provider, "Session challenge received");
                    let answer = self.responder.respond(&self.provider, &challenge).await?;
                    state = self.driver.answer(&challenge, &answer).await?;
                }
            }
        }
        match state {
            SessionState::Ready => Ok(()),
            SessionState::Challenged(_) => Err(RotatorError::Session(format!(
                "{} kept challenging after {} answers",
                self.provider, MAX_CHALLENGES
            ))),
        }
    }

    async fn regenerate_and_read(&self, name: &str) -> Result<Zeroizing<String>, RotatorError> {
        self.establish().await?;
        self.driver.regenerate(name).await?;
        self.driver.read_value(name).await
    }
}

#[async_trait]
impl<D: SessionDriver + ?Sized> ProviderRotator for SessionRotator<D> {
    fn strategy(&self) -> ProviderStrategy {
        ProviderStrategy::Session
    }

    async fn rotate(&self, request: &RotationRequest) -> Result<RotationOutcome, RotatorError> {
        let result = self.regenerate_and_read(&request.credential_name).await;
        self.driver.close().await;

        let value = result?;
        if value.trim().is_empty() {
            return Err(RotatorError::Session("regenerated value was empty".to_string()));
        }
        Ok(RotationOutcome::Issued(IssuedCredential::new(value, None)))
    }

    async fn validate(&self, name: &str, candidate: &str) -> Result<bool, RotatorError> {
        match &self.validator {
            Some(v) => v.validate(name, candidate).await,
            None => Ok(!candidate.trim().is_empty()),
        }
    }

    async fn revoke(&self, name: &str, _handle: &RevocationHandle) -> Result<RevokeOutcome, RotatorError> {
        let result = async {
            self.establish().await?;
            self.driver.revoke_previous(name).await
        }
        .await;
        self.driver.close().await;

        result?;
        Ok(RevokeOutcome::Revoked)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SecurityTier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Challenges once for a second factor, then accepts "123456".
    #[derive(Default)]
    struct ConsoleDriver {
        answers: Mutex<Vec<String>>,
        closed: AtomicUsize,
        revoked: AtomicUsize,
    }

    #[async_trait]
    impl SessionDriver for ConsoleDriver {
        async fn establish(&self, _provider: &str) -> Result<SessionState, RotatorError> {
            Ok(SessionState::Challenged(SessionChallenge::SecondFactor {
                prompt: "Enter code".into(),
            }))
        }

        async fn answer(&self, challenge: &SessionChallenge, response: &str) -> Result<SessionState, RotatorError> {
            self.answers.lock().unwrap().push(response.to_string());
            if response == "123456" {
                Ok(SessionState::Ready)
            } else {
                Ok(SessionState::Challenged(challenge.clone()))
            }
        }

        async fn regenerate(&self, _name: &str) -> Result<(), RotatorError> {
            Ok(())
        }

        async fn read_value(&self, _name: &str) -> Result<Zeroizing<String>, RotatorError> {
            Ok(Zeroizing::new("console-issued".into()))
        }

        async fn revoke_previous(&self, _name: &str) -> Result<(), RotatorError> {
            self.revoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedCode(&'static str);

    #[async_trait]
    impl ChallengeResponder for FixedCode {
        async fn respond(&self, _provider: &str, _challenge: &SessionChallenge) -> Result<Zeroizing<String>, RotatorError> {
            Ok(Zeroizing::new(self.0.to_string()))
        }
    }

    fn request() -> RotationRequest {
        RotationRequest {
            credential_name: "TWILIO_AUTH_TOKEN".into(),
            provider: "twilio".into(),
            tier: SecurityTier::Standard,
            current_key_id: None,
        }
    }

    #[tokio::test]
    async fn test_second_factor_then_issue() {
        let driver = Arc::new(ConsoleDriver::default());
        let rotator = SessionRotator::new("twilio", driver.clone(), Arc::new(FixedCode("123456")), None);

        match rotator.rotate(&request()).await.unwrap() {
            RotationOutcome::Issued(issued) => assert_eq!(issued.value(), "console-issued"),
            RotationOutcome::Pending => panic!("session rotation is never pending"),
        }
        assert_eq!(driver.answers.lock().unwrap().as_slice(), ["123456".to_string()]);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_answers_give_up() {
        let driver = Arc::new(ConsoleDriver::default());
        let rotator = SessionRotator::new("twilio", driver.clone(), Arc::new(FixedCode("000000")), None);

        assert!(matches!(rotator.rotate(&request()).await, Err(RotatorError::Session(_))));
        assert_eq!(driver.answers.lock().unwrap().len(), MAX_CHALLENGES);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1, "Session closed even on failure");
    }

    #[tokio::test]
    async fn test_declined_challenge_fails() {
        let driver: Arc<dyn SessionDriver> = Arc::new(ConsoleDriver::default());
        let rotator = SessionRotator::new("twilio", driver, Arc::new(DeclineChallenges), None);
        assert!(matches!(rotator.rotate(&request()).await, Err(RotatorError::Session(_))));
    }

    #[tokio::test]
    async fn test_revoke_runs_through_session() {
        let driver = Arc::new(ConsoleDriver::default());
        let rotator = SessionRotator::new("twilio", driver.clone(), Arc::new(FixedCode("123456")), None);

        let outcome = rotator.revoke("TWILIO_AUTH_TOKEN", &RevocationHandle::default()).await.unwrap();
        assert_eq!(outcome, RevokeOutcome::Revoked);
        assert_eq!(driver.revoked.load(Ordering::SeqCst), 1);
    }
}
