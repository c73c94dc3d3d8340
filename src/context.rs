// Keyward — Engine context
//
// Built once at startup and shared by the sync engine, the scheduler and the
// rotators. Nothing in here is re-created mid-run.

use std::sync::Arc;

use crate::alerts::Notifier;
use crate::enclave::Fingerprinter;
use crate::retry::RetryPolicy;

pub struct EngineContext {
    pub fingerprinter: Fingerprinter,
    pub http: reqwest::Client,
    pub notifier: Arc<dyn Notifier>,
    pub retry: RetryPolicy,
}

impl EngineContext {
    pub fn new(
        fingerprinter: Fingerprinter,
        http: reqwest::Client,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fingerprinter,
            http,
            notifier,
            retry,
        }
    }

    /// Shared HTTP client with the per-attempt timeout as its request timeout.
    pub fn http_client(retry: &RetryPolicy) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(retry.timeout)
            .user_agent(concat!("keyward/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

#[cfg(test)]
impl EngineContext {
    /// Fixed fingerprint key, single-attempt retries.
    pub fn for_tests(notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            Fingerprinter::new(&[7u8; 32]).expect("fingerprinter"),
            reqwest::Client::new(),
            notifier,
            RetryPolicy::once(std::time::Duration::from_secs(5)),
        )
    }
}
