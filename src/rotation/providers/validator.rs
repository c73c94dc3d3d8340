// Keyward — HTTP validation

use async_trait::async_trait;

use crate::config::ValidationConfig;
use crate::rotation::rotator::CredentialValidator;
use crate::rotation::RotatorError;

/// `GET url` with the candidate in an auth header. 2xx is valid, 401/403 is
/// invalid, anything else is a provider error.
pub struct HttpValidator {
    client: reqwest::Client,
    config: ValidationConfig,
}

impl HttpValidator {
    pub fn new(client: reqwest::Client, config: ValidationConfig) -> Self {
        Self { client, config }
    }

    fn header_value(&self, candidate: &str) -> String {
        if self.config.header.eq_ignore_ascii_case("authorization") && !self.config.scheme.is_empty() {
            format!("{} {}", self.config.scheme, candidate)
        } else {
            candidate.to_string()
        }
    }
}

#[async_trait]
impl CredentialValidator for HttpValidator {
    async fn validate(&self, name: &str, candidate: &str) -> Result<bool, RotatorError> {
        let response = self
            .client
            .get(&self.config.url)
            .header(self.config.header.as_str(), self.header_value(candidate))
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(credential = %name, status = status.as_u16(), "Validation call returned");

        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Ok(false)
        } else {
            Err(RotatorError::Rejected {
                status: status.as_u16(),
                message: "unexpected validation status".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn validator(server: &MockServer, header_name: &str, scheme: &str) -> HttpValidator {
        HttpValidator::new(
            reqwest::Client::new(),
            ValidationConfig {
                url: format!("{}/v1/models", server.uri()),
                header: header_name.to_string(),
                scheme: scheme.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_valid_key_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-good"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let v = validator(&server, "Authorization", "Bearer");
        assert!(v.validate("OPENAI_API_KEY", "sk-good").await.unwrap());
        assert!(!v.validate("OPENAI_API_KEY", "sk-bad").await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_header_sends_raw_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-api-key", "raw-key"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let v = validator(&server, "X-Api-Key", "Bearer");
        assert!(v.validate("ANTHROPIC_API_KEY", "raw-key").await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let v = validator(&server, "Authorization", "Bearer");
        let err = v.validate("OPENAI_API_KEY", "sk").await.unwrap_err();
        assert!(crate::retry::Retryable::is_retryable(&err));
    }
}
