// Keyward — GitHub Actions repository secrets
//
// Destinations are `owner/repo`. The repository must report itself private
// before anything is written to it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use zeroize::Zeroizing;

use super::crypto::{DestinationKey, SealedSecret};
use super::remote::{RemoteSecretStore, TokenSource};
use super::target::Visibility;
use super::SyncError;
use crate::store::CredentialStore;

const GITHUB_API_VERSION: &str = "2022-11-28";

/// Reads the API token from a Bootstrap credential in the store.
pub struct StoreTokenSource {
    store: Arc<CredentialStore>,
    credential: String,
}

impl StoreTokenSource {
    pub fn new(store: Arc<CredentialStore>, credential: impl Into<String>) -> Self {
        Self {
            store,
            credential: credential.into(),
        }
    }
}

impl TokenSource for StoreTokenSource {
    fn token(&self) -> Result<Zeroizing<String>, SyncError> {
        self.store
            .value(&self.credential)
            .map_err(|_| SyncError::Auth(format!("credential {} is not in the store", self.credential)))
    }
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    private: bool,
    #[serde(default)]
    visibility: Option<Visibility>,
}

pub struct GithubSecretStore {
    client: reqwest::Client,
    api_url: String,
    token: Arc<dyn TokenSource>,
}

impl GithubSecretStore {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>, token: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn split_destination(destination: &str) -> Result<(&str, &str), SyncError> {
        match destination.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok((owner, repo))
            }
            _ => Err(SyncError::TargetRejected {
                destination: destination.to_string(),
                reason: "destination must be owner/repo".to_string(),
            }),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, SyncError> {
        let token = self.token.token()?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(token.as_str())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header("User-Agent", "keyward"))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect();
        Err(SyncError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteSecretStore for GithubSecretStore {
    async fn visibility(&self, destination: &str) -> Result<Visibility, SyncError> {
        let (owner, repo) = Self::split_destination(destination)?;
        let response = self
            .request(reqwest::Method::GET, &format!("/repos/{}/{}", owner, repo))?
            .send()
            .await?;
        let repo: RepoResponse = Self::check(response).await?.json().await?;

        Ok(match (repo.private, repo.visibility) {
            (_, Some(v)) => v,
            (true, None) => Visibility::Private,
            (false, None) => Visibility::Public,
        })
    }

    async fn public_key(&self, destination: &str) -> Result<DestinationKey, SyncError> {
        let (owner, repo) = Self::split_destination(destination)?;
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/{}/actions/secrets/public-key", owner, repo),
            )?
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn put_secret(&self, destination: &str, name: &str, sealed: &SealedSecret) -> Result<(), SyncError> {
        let (owner, repo) = Self::split_destination(destination)?;
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/repos/{}/{}/actions/secrets/{}", owner, repo, name),
            )?
            .json(&json!({
                "encrypted_value": sealed.encrypted_value,
                "key_id": sealed.key_id,
            }))
            .send()
            .await?;
        let response = Self::check(response).await?;

        tracing::debug!(
            destination = %destination,
            credential = %name,
            status = response.status().as_u16(),
            "Secret written"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken(&'static str);

    impl TokenSource for StaticToken {
        fn token(&self) -> Result<Zeroizing<String>, SyncError> {
            Ok(Zeroizing::new(self.0.to_string()))
        }
    }

    fn store(server: &MockServer) -> GithubSecretStore {
        GithubSecretStore::new(reqwest::Client::new(), server.uri(), Arc::new(StaticToken("ghp_test")))
    }

    #[tokio::test]
    async fn test_visibility_private_repo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api"))
            .and(header("authorization", "Bearer ghp_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "private": true,
                "visibility": "private"
            })))
            .mount(&server)
            .await;

        assert_eq!(store(&server).visibility("acme/api").await.unwrap(), Visibility::Private);
    }

    #[tokio::test]
    async fn test_visibility_public_without_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/site"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "private": false })))
            .mount(&server)
            .await;

        assert_eq!(store(&server).visibility("acme/site").await.unwrap(), Visibility::Public);
    }

    #[tokio::test]
    async fn test_internal_repo_is_not_private() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "private": true,
                "visibility": "internal"
            })))
            .mount(&server)
            .await;

        assert_eq!(store(&server).visibility("acme/tools").await.unwrap(), Visibility::Internal);
    }

    #[tokio::test]
    async fn test_public_key_and_put() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/actions/secrets/public-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key_id": "012345678912345678",
                "key": "2Sg8iYjAxxmI2LvUXpJjkYrMxURPc8r+dB7TJyvv1234"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/acme/api/actions/secrets/DB_SECRET"))
            .and(body_partial_json(json!({ "key_id": "012345678912345678" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let gh = store(&server);
        let key = gh.public_key("acme/api").await.unwrap();
        assert_eq!(key.key_id, "012345678912345678");

        let sealed = SealedSecret {
            key_id: key.key_id,
            encrypted_value: "c2VhbGVk".into(),
        };
        gh.put_secret("acme/api", "DB_SECRET", &sealed).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_maps_to_remote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        match store(&server).visibility("acme/api").await {
            Err(SyncError::Remote { status, .. }) => assert_eq!(status, 503),
            other => panic!("Expected Remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_destination_rejected() {
        let server = MockServer::start().await;
        assert!(matches!(
            store(&server).visibility("not-a-repo").await,
            Err(SyncError::TargetRejected { .. })
        ));
    }
}
