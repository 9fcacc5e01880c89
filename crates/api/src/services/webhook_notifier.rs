//! Outbound webhook for escalation channels that leave the process (push, SMS, email).
//!
//! The receiving gateway fans the notification out to its providers. Each
//! request carries an HMAC-SHA256 signature of the body so the receiver can
//! authenticate it.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NotificationsConfig;
use domain::services::{ExternalDelivery, ExternalNotification, ExternalNotifier};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

#[derive(Debug, Error)]
pub enum WebhookNotifierError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("HMAC signing error: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    event_type: &'static str,
    #[serde(flatten)]
    notification: &'a ExternalNotification,
}

pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationsConfig) -> Result<Self, WebhookNotifierError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let url = config.webhook_url.clone().filter(|u| !u.trim().is_empty());
        if url.is_none() {
            info!("No notification webhook configured; external channels will be skipped");
        }

        Ok(Self {
            client,
            url,
            secret: config.webhook_secret.clone().filter(|s| !s.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn post(
        &self,
        url: &str,
        notification: &ExternalNotification,
    ) -> Result<u16, WebhookNotifierError> {
        let body = serde_json::to_string(&WebhookPayload {
            event_type: "emergency_alert.escalated",
            notification,
        })?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Alert-Id", notification.alert_id.to_string())
            .header("X-Channel", notification.channel.as_str());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, secret)?);
        }

        let response = request.body(body).send().await?;
        Ok(response.status().as_u16())
    }
}

/// `sha256=<hex HMAC of the body>`
pub fn sign_payload(payload: &str, secret: &str) -> Result<String, WebhookNotifierError> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookNotifierError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl ExternalNotifier for WebhookNotifier {
    async fn send(&self, notification: &ExternalNotification) -> ExternalDelivery {
        if notification.recipients.is_empty() {
            debug!(
                alert_id = %notification.alert_id,
                channel = %notification.channel,
                "No recipients for external channel"
            );
            return ExternalDelivery::Skipped;
        }
        let Some(url) = &self.url else {
            debug!(
                alert_id = %notification.alert_id,
                channel = %notification.channel,
                level = notification.level,
                "External channel skipped, webhook not configured"
            );
            return ExternalDelivery::Skipped;
        };

        match self.post(url, notification).await {
            Ok(status) if (200..300).contains(&status) => {
                info!(
                    alert_id = %notification.alert_id,
                    channel = %notification.channel,
                    level = notification.level,
                    recipients = notification.recipients.len(),
                    status,
                    "Escalation webhook delivered"
                );
                ExternalDelivery::Sent
            }
            Ok(status) => {
                warn!(
                    alert_id = %notification.alert_id,
                    channel = %notification.channel,
                    status,
                    "Escalation webhook rejected"
                );
                ExternalDelivery::Failed(format!("HTTP {}", status))
            }
            Err(e) => {
                warn!(
                    alert_id = %notification.alert_id,
                    channel = %notification.channel,
                    error = %e,
                    "Escalation webhook failed"
                );
                ExternalDelivery::Failed(e.to_string())
            }
        }
    }
}
