// Keyward — Operator notifications
//
// Failures, conflicts and approval requests reach a human through one or more
// channels. Every notification names the credential, its tier and the reason.
// Routine successes are logged, never notified.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;

use crate::config::{NotificationsConfig, WebhookConfig};
use crate::store::SecurityTier;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of body>` on signed webhooks.
pub const SIGNATURE_HEADER: &str = "X-Keyward-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RotationFailed,
    RotationConflict,
    ApprovalRequired,
    ManualRotationRequested,
    RotationUpcoming,
    RevocationSkipped,
    TargetRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Credential name, or the destination id for `TargetRejected`.
    pub credential_name: String,
    pub tier: Option<SecurityTier>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        credential_name: impl Into<String>,
        tier: Option<SecurityTier>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            credential_name: credential_name.into(),
            tier,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Send and forget: a notification failure never fails the caller.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification).await {
        tracing::warn!(
            credential = %notification.credential_name,
            kind = ?notification.kind,
            error = %e,
            "Notification could not be delivered"
        );
    }
}

// ─── Log channel ─────────────────────────────────────────────────────────────

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let tier = n.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        match n.kind {
            NotificationKind::RotationFailed
            | NotificationKind::RotationConflict
            | NotificationKind::TargetRejected => {
                tracing::error!(credential = %n.credential_name, tier = %tier, kind = ?n.kind, reason = %n.reason, "Operator attention required");
            }
            _ => {
                tracing::warn!(credential = %n.credential_name, tier = %tier, kind = ?n.kind, reason = %n.reason, "Operator notification");
            }
        }
        Ok(())
    }
}

// ─── Webhook channel ─────────────────────────────────────────────────────────

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, config: &WebhookConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            signing_secret: config.signing_secret.clone(),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| NotifyError::Delivery(format!("invalid webhook secret: {}", e)))?;
        mac.update(body);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(n)
            .map_err(|e| NotifyError::Delivery(format!("failed to serialize notification: {}", e)))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");

        if let Some(secret) = &self.signing_secret {
            request = request.header(SIGNATURE_HEADER, Self::sign(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Delivery(format!("webhook returned {}", status)));
        }

        tracing::debug!(url = %self.url, kind = ?n.kind, "Webhook notification delivered");
        Ok(())
    }
}

// ─── Fan-out ─────────────────────────────────────────────────────────────────

/// Delivers to every channel. Succeeds if at least one channel accepted the
/// notification.
pub struct FanoutNotifier {
    channels: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn from_config(config: &NotificationsConfig, client: &reqwest::Client) -> Self {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if config.log {
            channels.push(Arc::new(LogNotifier));
        }
        for hook in &config.webhooks {
            channels.push(Arc::new(WebhookNotifier::new(client.clone(), hook)));
        }
        Self::new(channels)
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let mut last_error = None;
        let mut delivered = 0usize;

        for channel in &self.channels {
            match channel.notify(n).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(credential = %n.credential_name, error = %e, "Notification channel failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
