// Keyward — Rotator registry
//
// Provider key → rotator, built once from configuration at startup.
// Adding a provider means registering an implementation, not subclassing.

use std::collections::HashMap;
use std::sync::Arc;

use super::providers::{ApiRotator, ChallengeResponder, HttpValidator, ManualRotator, SessionDriver, SessionRotator};
use super::rotator::{CredentialValidator, ProviderRotator};
use crate::config::{Config, ConfigError, ProviderStrategy};
use crate::context::EngineContext;
use crate::store::CredentialStore;

/// Session drivers available to `session` providers, by driver key.
pub type SessionDrivers = HashMap<String, Arc<dyn SessionDriver>>;

#[derive(Default)]
pub struct RotatorRegistry {
    rotators: HashMap<String, Arc<dyn ProviderRotator>>,
}

impl RotatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl Into<String>, rotator: Arc<dyn ProviderRotator>) {
        self.rotators.insert(provider.into(), rotator);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ProviderRotator>> {
        self.rotators.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.rotators.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn from_config(
        config: &Config,
        ctx: &Arc<EngineContext>,
        store: &Arc<CredentialStore>,
        drivers: &SessionDrivers,
        responder: Arc<dyn ChallengeResponder>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for provider in &config.providers {
            let validator: Option<Arc<dyn CredentialValidator>> = provider
                .validation
                .clone()
                .map(|v| Arc::new(HttpValidator::new(ctx.http.clone(), v)) as Arc<dyn CredentialValidator>);

            let rotator: Arc<dyn ProviderRotator> = match provider.strategy {
                ProviderStrategy::Api => {
                    let api = provider.api.clone().ok_or(ConfigError::MissingField {
                        provider: provider.key.clone(),
                        field: "base_url",
                    })?;
                    Arc::new(ApiRotator::new(
                        &provider.key,
                        api,
                        ctx.http.clone(),
                        Arc::clone(store),
                        validator,
                    ))
                }
                ProviderStrategy::Session => {
                    let driver_key = provider.driver.clone().unwrap_or_default();
                    let driver = drivers.get(&driver_key).cloned().ok_or_else(|| ConfigError::UnknownDriver {
                        provider: provider.key.clone(),
                        driver: driver_key.clone(),
                    })?;
                    Arc::new(SessionRotator::new(&provider.key, driver, Arc::clone(&responder), validator))
                }
                ProviderStrategy::Manual => Arc::new(ManualRotator::new(
                    &provider.key,
                    provider.instructions.clone(),
                    Arc::clone(&ctx.notifier),
                    Arc::clone(store),
                    validator,
                )),
            };

            tracing::debug!(provider = %provider.key, strategy = %provider.strategy, "Rotator registered");
            registry.register(provider.key.clone(), rotator);
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::providers::DeclineChallenges;
    use crate::testing::{loaded_store, RecordingNotifier};

    const PROVIDERS: &str = r#"
[[providers]]
key = "openai"
strategy = "api"
credentials = ["OPENAI_API_KEY"]
admin_credential = "OPENAI_ADMIN_KEY"
base_url = "https://api.openai.com"
create_path = "/v1/keys"

[[providers]]
key = "sendgrid"
strategy = "manual"
credentials = ["SENDGRID_*"]
"#;

    #[tokio::test]
    async fn test_builds_one_rotator_per_provider() {
        let config = Config::from_toml(PROVIDERS).unwrap();
        let ctx = Arc::new(EngineContext::for_tests(Arc::new(RecordingNotifier::default())));
        let (_dir, store) = loaded_store("").await;

        let registry =
            RotatorRegistry::from_config(&config, &ctx, &store, &SessionDrivers::new(), Arc::new(DeclineChallenges))
                .unwrap();

        assert_eq!(registry.providers(), vec!["openai".to_string(), "sendgrid".to_string()]);
        assert_eq!(registry.get("openai").unwrap().strategy(), ProviderStrategy::Api);
        assert_eq!(registry.get("sendgrid").unwrap().strategy(), ProviderStrategy::Manual);
        assert!(registry.get("stripe").is_none());
    }

    #[tokio::test]
    async fn test_unregistered_session_driver_rejected() {
        let config = Config::from_toml(
            r#"
[[providers]]
key = "twilio"
strategy = "session"
credentials = ["TWILIO_*"]
driver = "twilio-console"
"#,
        )
        .unwrap();
        let ctx = Arc::new(EngineContext::for_tests(Arc::new(RecordingNotifier::default())));
        let (_dir, store) = loaded_store("").await;

        let result =
            RotatorRegistry::from_config(&config, &ctx, &store, &SessionDrivers::new(), Arc::new(DeclineChallenges));
        assert!(matches!(result, Err(ConfigError::UnknownDriver { driver, .. }) if driver == "twilio-console"));
    }
}
