// Keyward — Credential catalog
//
// Answers "what is this name?" for the store: classification, provider, tier
// and role, all derived from the loaded configuration.

use std::sync::Arc;

use crate::classifier::Decision;
use crate::config::Config;
use crate::store::{Annotate, Annotation, Classification, CredentialRole};

#[derive(Clone)]
pub struct Catalog {
    config: Arc<Config>,
}

impl Catalog {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn decide(&self, name: &str) -> Decision {
        self.config.classifier.decide(name)
    }
}

impl Annotate for Catalog {
    fn annotate(&self, name: &str) -> Annotation {
        let classification = self.config.classifier.decide(name).classification;

        // Settings are never rotated, so they never get a provider.
        let provider = match classification {
            Classification::Secret => self.config.provider_for(name).map(|p| p.key.clone()),
            Classification::Setting => None,
        };

        let role = if self.config.is_bootstrap(name) {
            CredentialRole::Bootstrap
        } else {
            CredentialRole::Standard
        };

        Annotation {
            classification,
            provider,
            security_tier: self.config.policy.tier_for(name),
            role,
        }
    }
}
