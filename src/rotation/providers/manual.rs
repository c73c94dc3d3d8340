// Keyward — Manual-strategy rotator
//
// Cannot obtain a value itself. `rotate` asks a human through the notifier
// and returns Pending; the value arrives later through the scheduler's
// completion entry point and is validated like any other.

use std::sync::Arc;

use async_trait::async_trait;

use crate::alerts::{Notification, NotificationKind, Notifier};
use crate::config::ProviderStrategy;
use crate::rotation::rotator::{
    CredentialValidator, ProviderRotator, RevocationHandle, RevokeOutcome, RotationOutcome, RotationRequest,
};
use crate::rotation::RotatorError;
use crate::store::CredentialStore;

pub struct ManualRotator {
    provider: String,
    instructions: Option<String>,
    notifier: Arc<dyn Notifier>,
    store: Arc<CredentialStore>,
    validator: Option<Arc<dyn CredentialValidator>>,
}

impl ManualRotator {
    pub fn new(
        provider: impl Into<String>,
        instructions: Option<String>,
        notifier: Arc<dyn Notifier>,
        store: Arc<CredentialStore>,
        validator: Option<Arc<dyn CredentialValidator>>,
    ) -> Self {
        Self {
            provider: provider.into(),
            instructions,
            notifier,
            store,
            validator,
        }
    }
}

#[async_trait]
impl ProviderRotator for ManualRotator {
    fn strategy(&self) -> ProviderStrategy {
        ProviderStrategy::Manual
    }

    async fn rotate(&self, request: &RotationRequest) -> Result<RotationOutcome, RotatorError> {
        let reason = match &self.instructions {
            Some(steps) => format!(
                "Rotate {} at {}: {}. Then run `keyward complete {}`.",
                request.credential_name, self.provider, steps, request.credential_name
            ),
            None => format!(
                "Rotate {} at {}, then run `keyward complete {}`.",
                request.credential_name, self.provider, request.credential_name
            ),
        };

        // The request is the whole point of this rotator; an undelivered one
        // is a failed rotation.
        self.notifier
            .notify(&Notification::new(
                NotificationKind::ManualRotationRequested,
                &request.credential_name,
                Some(request.tier),
                reason,
            ))
            .await
            .map_err(|e| RotatorError::Unavailable(e.to_string()))?;

        tracing::info!(provider = %self.provider, credential = %request.credential_name, "Manual rotation requested");
        Ok(RotationOutcome::Pending)
    }

    async fn validate(&self, name: &str, candidate: &str) -> Result<bool, RotatorError> {
        if let Some(v) = &self.validator {
            return v.validate(name, candidate).await;
        }
        if candidate.trim().is_empty() {
            return Ok(false);
        }
        match self.store.value(name) {
            Ok(current) => Ok(current.as_str() != candidate),
            Err(_) => Ok(true),
        }
    }

    async fn revoke(&self, _name: &str, _handle: &RevocationHandle) -> Result<RevokeOutcome, RotatorError> {
        Ok(RevokeOutcome::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SecurityTier;
    use crate::testing::{loaded_store, RecordingNotifier};

    #[tokio::test]
    async fn test_rotate_notifies_and_is_pending() {
        let (_dir, store) = loaded_store("SENDGRID_API_KEY=SG.old\n").await;
        let notifier = Arc::new(RecordingNotifier::default());
        let rotator = ManualRotator::new("sendgrid", Some("Settings > API Keys".into()), notifier.clone(), store, None);

        let outcome = rotator
            .rotate(&RotationRequest {
                credential_name: "SENDGRID_API_KEY".into(),
                provider: "sendgrid".into(),
                tier: SecurityTier::Low,
                current_key_id: None,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RotationOutcome::Pending));
        assert_eq!(notifier.kinds(), vec![NotificationKind::ManualRotationRequested]);
        assert!(notifier.all()[0].reason.contains("Settings > API Keys"));
    }

    #[tokio::test]
    async fn test_validation_without_endpoint_requires_a_change() {
        let (_dir, store) = loaded_store("SENDGRID_API_KEY=SG.old\n").await;
        let rotator = ManualRotator::new("sendgrid", None, Arc::new(RecordingNotifier::default()), store, None);

        assert!(!rotator.validate("SENDGRID_API_KEY", "SG.old").await.unwrap());
        assert!(!rotator.validate("SENDGRID_API_KEY", "  ").await.unwrap());
        assert!(rotator.validate("SENDGRID_API_KEY", "SG.new").await.unwrap());
    }
}
