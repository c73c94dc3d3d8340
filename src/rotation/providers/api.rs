// Keyward — API-strategy rotator
//
// Talks to a provider's key-management API with a held admin credential:
// create a key, validate it, revoke the old one. The admin credential is a
// Bootstrap record read from the store on every call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::config::{ApiProviderConfig, ProviderStrategy};
use crate::rotation::rotator::{
    CredentialValidator, IssuedCredential, ProviderRotator, RevocationHandle, RevokeOutcome, RotationOutcome,
    RotationRequest,
};
use crate::rotation::RotatorError;
use crate::store::CredentialStore;

pub struct ApiRotator {
    provider: String,
    config: ApiProviderConfig,
    client: reqwest::Client,
    store: Arc<CredentialStore>,
    validator: Option<Arc<dyn CredentialValidator>>,
}

impl ApiRotator {
    pub fn new(
        provider: impl Into<String>,
        config: ApiProviderConfig,
        client: reqwest::Client,
        store: Arc<CredentialStore>,
        validator: Option<Arc<dyn CredentialValidator>>,
    ) -> Self {
        Self {
            provider: provider.into(),
            config,
            client,
            store,
            validator,
        }
    }

    fn admin_token(&self) -> Result<Zeroizing<String>, RotatorError> {
        self.store
            .value(&self.config.admin_credential)
            .map_err(|_| RotatorError::MissingCredential(self.config.admin_credential.clone()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn delete_key(&self, key_id: &str, revoke_path: &str) -> Result<(), RotatorError> {
        let admin = self.admin_token()?;
        let response = self
            .client
            .delete(self.url(&revoke_path.replace("{key_id}", key_id)))
            .bearer_auth(admin.as_str())
            .send()
            .await?;

        let status = response.status();
        // Already gone counts as revoked.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RotatorError::Rejected {
            status: status.as_u16(),
            message: format!("revoking key {} failed", key_id),
        })
    }
}

/// Pull a string at `pointer`; numbers are accepted for ids.
fn string_at(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl ProviderRotator for ApiRotator {
    fn strategy(&self) -> ProviderStrategy {
        ProviderStrategy::Api
    }

    async fn rotate(&self, request: &RotationRequest) -> Result<RotationOutcome, RotatorError> {
        let admin = self.admin_token()?;
        let body = self
            .config
            .create_body
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "name": format!("keyward-{}", request.credential_name.to_lowercase()) }));

        let response = self
            .client
            .post(self.url(&self.config.create_path))
            .bearer_auth(admin.as_str())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RotatorError::Rejected {
                status: status.as_u16(),
                message: format!("{} key creation failed", self.provider),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RotatorError::InvalidResponse(e.to_string()))?;
        let value = string_at(&body, &self.config.value_pointer).ok_or_else(|| {
            RotatorError::InvalidResponse(format!("no value at {}", self.config.value_pointer))
        })?;
        let key_id = string_at(&body, &self.config.key_id_pointer);

        tracing::info!(
            provider = %self.provider,
            credential = %request.credential_name,
            key_id = ?key_id,
            "Provider issued a new key"
        );
        Ok(RotationOutcome::Issued(IssuedCredential::new(Zeroizing::new(value), key_id)))
    }

    async fn validate(&self, name: &str, candidate: &str) -> Result<bool, RotatorError> {
        match &self.validator {
            Some(v) => v.validate(name, candidate).await,
            None => Ok(!candidate.trim().is_empty()),
        }
    }

    async fn revoke(&self, name: &str, handle: &RevocationHandle) -> Result<RevokeOutcome, RotatorError> {
        let Some(revoke_path) = &self.config.revoke_path else {
            return Ok(RevokeOutcome::NotSupported);
        };
        let Some(key_id) = &handle.key_id else {
            return Ok(RevokeOutcome::Skipped(format!(
                "no provider key id recorded for the previous value of {}",
                name
            )));
        };

        self.delete_key(key_id, revoke_path).await?;
        tracing::info!(provider = %self.provider, credential = %name, key_id = %key_id, "Old key revoked");
        Ok(RevokeOutcome::Revoked)
    }

    async fn discard(&self, name: &str, issued: &IssuedCredential) -> Result<(), RotatorError> {
        match (&self.config.revoke_path, &issued.key_id) {
            (Some(revoke_path), Some(key_id)) => {
                self.delete_key(key_id, revoke_path).await?;
                tracing::info!(provider = %self.provider, credential = %name, key_id = %key_id, "Unadopted key discarded");
                Ok(())
            }
            _ => {
                tracing::warn!(provider = %self.provider, credential = %name, "Unadopted key has no id; delete it at the provider");
                Ok(())
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
