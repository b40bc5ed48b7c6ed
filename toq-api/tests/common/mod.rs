//! Common test utilities for integration tests
//!
//! Builds the router over the in-memory identity store, so the HTTP
//! surface is exercised without Postgres or Redis:
//! - `TestContext::new()` wires the service and the router
//! - `call()` sends one request and decodes the JSON body
//! - `admin_tokens()` mints a root token for the template user

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use serde_json::Value;
use toq_api::app::{build_router, AppState};
use toq_api::config::ApiConfig;
use toq_shared::auth::jwt::{JwtConfig, TokenIssuer, TokenPair, UserInfos};
use toq_shared::blocklist::MemoryBlocklist;
use toq_shared::config::IdentityConfig;
use toq_shared::events::SessionEventBus;
use toq_shared::identity::{DeviceInfo, IdentityDeps, IdentityService, SignupRequest};
use toq_shared::memory::{
    MemoryObjectStore, MemoryPhotoSessions, MemoryStore, RecordingGateway,
    RecordingListingCleanup, RecordingPermissionCache,
};
use toq_shared::models::{RoleSlug, RoleStatus};
use toq_shared::notification::NotificationService;
use toq_shared::policy::{TransitionPolicy, YamlStrSource};
use toq_shared::storage::{StorageConfig, StorageService};
use toq_shared::telemetry::RequestContext;
use toq_shared::verification::{CepAddress, StaticIdentityVerifier};
use tower::ServiceExt;

pub const OWNER_CPF: &str = "52998224725";
pub const PASSWORD: &str = "Abcdefgh1!";
pub const DEVICE_ID: &str = "8f14e45f-ceea-4e7a-9c3b-5a1d2c3e4f50";
pub const CALLBACK_SECRET: &str = "media-callback-secret";

/// Router plus handles on the in-memory adapters
pub struct TestContext {
    pub app: axum::Router,
    pub identity: Arc<IdentityService<MemoryStore>>,
    pub store: Arc<MemoryStore>,
    pub blocklist: Arc<MemoryBlocklist>,
}

impl TestContext {
    pub fn new() -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let blocklist = Arc::new(MemoryBlocklist::new());
        let policy = Arc::new(TransitionPolicy::load(Box::new(YamlStrSource::builtin()))?);

        let verifier = StaticIdentityVerifier::new()
            .with_person(OWNER_CPF, birth_date(), "Maria da Silva")
            .with_address(CepAddress {
                zip_code: "01310100".to_string(),
                street: "Avenida Paulista".to_string(),
                neighborhood: "Bela Vista".to_string(),
                city: "São Paulo".to_string(),
                state: "SP".to_string(),
            });

        let identity = Arc::new(IdentityService::new(IdentityDeps {
            store: Arc::clone(&store),
            notifier: Arc::new(NotificationService::new(Arc::new(RecordingGateway::new()))),
            device_tokens: store.clone(),
            blocklist: blocklist.clone(),
            permissions: Arc::new(RecordingPermissionCache::new()),
            storage: StorageService::new(Arc::new(MemoryObjectStore::new()), StorageConfig::default()),
            verifier: Arc::new(verifier),
            listings: Arc::new(RecordingListingCleanup::new()),
            photo_sessions: Arc::new(MemoryPhotoSessions::new()),
            policy: Arc::clone(&policy),
            tokens: TokenIssuer::new(JwtConfig::for_secret("api-test-secret-with-32-bytes-or-more")),
            events: SessionEventBus::new(),
            config: IdentityConfig::for_test(),
        })?);

        let state = AppState {
            identity: Arc::clone(&identity),
            store: Arc::clone(&store),
            policy,
            redis: None,
            config: Arc::new(ApiConfig {
                media_callback_secret: Some(CALLBACK_SECRET.to_string()),
                ..ApiConfig::default()
            }),
        };

        Ok(Self {
            app: build_router(state),
            identity,
            store,
            blocklist,
        })
    }

    /// Sends a request and returns the status with the decoded body
    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Creates the owner used by the session tests
    pub async fn sign_up_owner(&self) -> anyhow::Result<TokenPair> {
        let tokens = self
            .identity
            .signup(&RequestContext::generate(), owner_signup(), device())
            .await?;
        Ok(tokens)
    }

    /// Root token for the template user
    pub fn admin_tokens(&self) -> anyhow::Result<TokenPair> {
        Ok(self.identity.tokens().mint_pair(&UserInfos {
            id: 1,
            role: RoleSlug::Root,
            profile_status: RoleStatus::Active,
        })?)
    }
}

pub fn birth_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 5, 17).unwrap_or_default()
}

pub fn device() -> DeviceInfo {
    DeviceInfo {
        device_token: "fcm-token-api".to_string(),
        device_id: DEVICE_ID.to_string(),
        ip: Some("127.0.0.1".to_string()),
        user_agent: Some("toq-api-tests".to_string()),
    }
}

pub fn owner_signup() -> SignupRequest {
    SignupRequest {
        role: RoleSlug::Owner,
        national_id: OWNER_CPF.to_string(),
        nickname: "maria".to_string(),
        email: "maria@toq.app".to_string(),
        phone: "11988887777".to_string(),
        birth_date: Some(birth_date()),
        zip_code: "01310-100".to_string(),
        number: "900".to_string(),
        complement: None,
        password: PASSWORD.to_string(),
        opt_in: true,
    }
}

/// JSON POST request
pub fn post_json(uri: &str, body: &Value, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}
