//! Unified notifications
//!
//! One request shape for email, SMS and push. Requests are validated
//! synchronously; delivery is either awaited ([`Notifier::send`]) or detached
//! onto the runtime ([`Notifier::dispatch`]) under a span linked to the
//! caller through an explicit [`ContextSnapshot`].
//!
//! Gateway failures never leave this module with provider detail: callers
//! only see an opaque internal error, the full chain goes to the log.

pub mod relay;
pub mod templates;

pub use relay::{HttpRelayGateway, NotificationConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{DomainError, DomainResult};
use crate::telemetry::{mark_span_error, ContextSnapshot};

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("gateway rejected notification: {0}")]
    Gateway(String),

    #[error("gateway http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification gateway not configured")]
    NotConfigured,
}

impl From<NotificationError> for DomainError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Invalid { field, message } => DomainError::validation(field, message),
            other => DomainError::internal(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        })
    }
}

/// Notification request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "type")]
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Push token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl NotificationRequest {
    pub fn email(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: Channel::Email,
            to: Some(to.into()),
            subject: Some(subject.into()),
            body: body.into(),
            image_url: None,
            token: None,
            data: BTreeMap::new(),
        }
    }

    pub fn sms(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: Channel::Sms,
            to: Some(to.into()),
            subject: None,
            body: body.into(),
            image_url: None,
            token: None,
            data: BTreeMap::new(),
        }
    }

    pub fn push(token: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: Channel::Push,
            to: None,
            subject: Some(subject.into()),
            body: body.into(),
            image_url: None,
            token: Some(token.into()),
            data: BTreeMap::new(),
        }
    }

    /// Copies `data` into the request
    pub fn with_data(mut self, data: &BTreeMap<String, String>) -> Self {
        self.data = data.clone();
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Checks the fields required by the channel
    pub fn validate(&self) -> Result<(), NotificationError> {
        let present = |value: &Option<String>| value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false);
        let require = |ok: bool, field: &'static str| {
            if ok {
                Ok(())
            } else {
                Err(NotificationError::Invalid {
                    field,
                    message: format!("{} is required for this notification type", field),
                })
            }
        };

        match self.channel {
            Channel::Email => {
                require(present(&self.to), "to")?;
                require(present(&self.subject), "subject")?;
            }
            Channel::Sms => require(present(&self.to), "to")?,
            Channel::Push => {
                require(present(&self.token), "token")?;
                require(present(&self.subject), "subject")?;
            }
        }
        require(!self.body.trim().is_empty(), "body")
    }
}

/// Transport for validated requests
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError>;

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError>;

    async fn send_push(
        &self,
        token: &str,
        title: &str,
        body: &str,
        image_url: Option<&str>,
        data: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError>;
}

/// Notification port consumed by the identity service
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Validates and delivers, waiting for the gateway
    async fn send(&self, request: NotificationRequest) -> DomainResult<()>;

    /// Validates, then delivers on a detached task correlated with
    /// `snapshot`; delivery failures are only logged
    fn dispatch(&self, snapshot: &ContextSnapshot, request: NotificationRequest)
        -> DomainResult<JoinHandle<()>>;
}

/// Routes requests to a [`NotificationGateway`]
#[derive(Clone)]
pub struct NotificationService {
    gateway: Arc<dyn NotificationGateway>,
}

impl fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationService").finish_non_exhaustive()
    }
}

impl NotificationService {
    pub fn new(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { gateway }
    }

    async fn deliver(gateway: &dyn NotificationGateway, request: &NotificationRequest) -> Result<(), NotificationError> {
        let to = request.to.as_deref().unwrap_or_default();
        let subject = request.subject.as_deref().unwrap_or_default();
        match request.channel {
            Channel::Email => gateway.send_email(to, subject, &request.body).await,
            Channel::Sms => gateway.send_sms(to, &request.body).await,
            Channel::Push => {
                gateway
                    .send_push(
                        request.token.as_deref().unwrap_or_default(),
                        subject,
                        &request.body,
                        request.image_url.as_deref(),
                        &request.data,
                    )
                    .await
            }
        }
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn send(&self, request: NotificationRequest) -> DomainResult<()> {
        request.validate()?;
        Self::deliver(self.gateway.as_ref(), &request).await.map_err(|e| {
            tracing::error!(channel = %request.channel, error = %e, "Notification delivery failed");
            DomainError::Internal("notification delivery failed".to_string())
        })
    }

    fn dispatch(
        &self,
        snapshot: &ContextSnapshot,
        request: NotificationRequest,
    ) -> DomainResult<JoinHandle<()>> {
        request.validate()?;
        let gateway = Arc::clone(&self.gateway);
        let request_id = snapshot.request_id().to_string();

        Ok(snapshot.spawn("notification.dispatch", async move {
            if let Err(e) = Self::deliver(gateway.as_ref(), &request).await {
                mark_span_error(&tracing::Span::current(), &e);
                tracing::warn!(
                    request_id = %request_id,
                    channel = %request.channel,
                    error = %e,
                    "Async notification failed"
                );
            }
        }))
    }
}
