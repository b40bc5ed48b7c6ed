/// HTTP notification relay
///
/// Posts every request as JSON to a relay service that owns the email, SMS
/// and push provider accounts. Bodies are signed with HMAC-SHA256 in
/// `X-Toq-Signature`; requests time out after `timeout_secs`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::time::Duration;

use super::{NotificationError, NotificationGateway, NotificationRequest};
use crate::auth::signature::{sign_body, SIGNATURE_HEADER};

/// Relay settings
#[derive(Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Relay endpoint; `None` disables outbound delivery
    pub relay_url: Option<String>,
    pub signing_secret: String,
    pub timeout_secs: u64,
    /// Base URL used in password-reset links
    pub app_base_url: String,
}

impl fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("relay_url", &self.relay_url)
            .field("signing_secret", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .field("app_base_url", &self.app_base_url)
            .finish()
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            signing_secret: String::new(),
            timeout_secs: 10,
            app_base_url: "https://app.toq.com.br".to_string(),
        }
    }
}

impl NotificationConfig {
    /// Reads `NOTIFICATION_RELAY_URL`, `NOTIFICATION_SIGNING_SECRET`,
    /// `NOTIFICATION_TIMEOUT_SECS` and `APP_BASE_URL`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            relay_url: env::var("NOTIFICATION_RELAY_URL").ok().filter(|v| !v.is_empty()),
            signing_secret: env::var("NOTIFICATION_SIGNING_SECRET").unwrap_or_default(),
            timeout_secs: env::var("NOTIFICATION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            app_base_url: env::var("APP_BASE_URL").unwrap_or(defaults.app_base_url),
        }
    }
}

/// Gateway posting to the relay
#[derive(Debug, Clone)]
pub struct HttpRelayGateway {
    http: Client,
    config: NotificationConfig,
}

impl HttpRelayGateway {
    pub fn new(config: NotificationConfig) -> Result<Self, NotificationError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    async fn post(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        let url = self
            .config
            .relay_url
            .as_deref()
            .ok_or(NotificationError::NotConfigured)?;

        let body = Bytes::from(serde_json::to_vec(&request).map_err(|e| {
            NotificationError::Gateway(format!("failed to encode request: {}", e))
        })?);
        let signature = sign_body(self.config.signing_secret.as_bytes(), &body);

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, format!("sha256={}", signature))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Gateway(format!(
                "relay answered {} for {}",
                status, request.channel
            )));
        }

        tracing::debug!(channel = %request.channel, "Notification relayed");
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for HttpRelayGateway {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        self.post(NotificationRequest::email(to, subject, body)).await
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError> {
        self.post(NotificationRequest::sms(to, body)).await
    }

    async fn send_push(
        &self,
        token: &str,
        title: &str,
        body: &str,
        image_url: Option<&str>,
        data: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError> {
        let mut request = NotificationRequest::push(token, title, body).with_data(data);
        request.image_url = image_url.map(str::to_string);
        self.post(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_relay_fails() {
        let gateway = HttpRelayGateway::new(NotificationConfig::default()).unwrap();
        let err = gateway.send_sms("+5511999999999", "hi").await.unwrap_err();
        assert!(matches!(err, NotificationError::NotConfigured));
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = NotificationConfig {
            signing_secret: "super-secret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
        assert_eq!(config.timeout_secs, 10);
    }
}
