//! Common test utilities for integration tests
//!
//! Assembles an `IdentityService` over the in-memory adapters, the same way
//! the binaries assemble it over Postgres, Redis and HTTP adapters.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
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

pub const OWNER_CPF: &str = "52998224725";
pub const REALTOR_CPF: &str = "11144477735";
pub const AGENCY_CNPJ: &str = "11222333000181";
pub const PASSWORD: &str = "Abcdefgh1!";
pub const DEVICE_ID: &str = "8f14e45f-ceea-4e7a-9c3b-5a1d2c3e4f50";

/// Service plus handles on every in-memory adapter
pub struct TestContext {
    pub service: IdentityService<MemoryStore>,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<RecordingGateway>,
    pub objects: Arc<MemoryObjectStore>,
    pub blocklist: Arc<MemoryBlocklist>,
    pub listings: Arc<RecordingListingCleanup>,
}

impl TestContext {
    pub fn new() -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let blocklist = Arc::new(MemoryBlocklist::new());
        let listings = Arc::new(RecordingListingCleanup::new());

        let verifier = StaticIdentityVerifier::new()
            .with_person(OWNER_CPF, birth_date(), "Maria da Silva")
            .with_person(REALTOR_CPF, birth_date(), "João Souza")
            .with_company(AGENCY_CNPJ, "Imobiliária Central Ltda")
            .with_address(CepAddress {
                zip_code: "01310100".to_string(),
                street: "Avenida Paulista".to_string(),
                neighborhood: "Bela Vista".to_string(),
                city: "São Paulo".to_string(),
                state: "SP".to_string(),
            });

        let policy = TransitionPolicy::load(Box::new(YamlStrSource::builtin()))?;

        let service = IdentityService::new(IdentityDeps {
            store: Arc::clone(&store),
            notifier: Arc::new(NotificationService::new(gateway.clone())),
            device_tokens: store.clone(),
            blocklist: blocklist.clone(),
            permissions: Arc::new(RecordingPermissionCache::new()),
            storage: StorageService::new(objects.clone(), StorageConfig::default()),
            verifier: Arc::new(verifier),
            listings: listings.clone(),
            photo_sessions: Arc::new(MemoryPhotoSessions::new()),
            policy: Arc::new(policy),
            tokens: TokenIssuer::new(JwtConfig::for_secret(
                "integration-secret-with-32-bytes-or-more",
            )),
            events: SessionEventBus::new(),
            config: IdentityConfig::for_test(),
        })?;

        Ok(Self {
            service,
            store,
            gateway,
            objects,
            blocklist,
            listings,
        })
    }

    /// Signs a user up and returns its id with the issued tokens
    pub async fn sign_up(
        &self,
        role: RoleSlug,
        national_id: &str,
        email: &str,
        phone: &str,
    ) -> anyhow::Result<(i64, TokenPair)> {
        let tokens = self
            .service
            .signup(
                &RequestContext::generate(),
                signup_request(role, national_id, email, phone),
                device(),
            )
            .await?;
        let claims = self.service.tokens().validate_access(&tokens.access_token)?;
        Ok((claims.user_info.id, tokens))
    }

    /// Context authenticated as the given user
    pub fn ctx_for(&self, tokens: &TokenPair) -> anyhow::Result<RequestContext> {
        let claims = self.service.tokens().validate_access(&tokens.access_token)?;
        Ok(RequestContext::generate().with_user(claims.user_info))
    }

    /// Notification tasks run detached; give them a moment
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

pub fn birth_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 5, 17).unwrap_or_default()
}

pub fn device() -> DeviceInfo {
    DeviceInfo {
        device_token: "fcm-token-integration".to_string(),
        device_id: DEVICE_ID.to_string(),
        ip: Some("127.0.0.1".to_string()),
        user_agent: Some("toq-integration".to_string()),
    }
}

pub fn signup_request(role: RoleSlug, national_id: &str, email: &str, phone: &str) -> SignupRequest {
    SignupRequest {
        role,
        national_id: national_id.to_string(),
        nickname: format!("nick-{}", &national_id[..4]),
        email: email.to_string(),
        phone: phone.to_string(),
        birth_date: Some(birth_date()),
        zip_code: "01310-100".to_string(),
        number: "900".to_string(),
        complement: None,
        password: PASSWORD.to_string(),
        opt_in: true,
    }
}

pub fn admin_ctx() -> RequestContext {
    RequestContext::generate().with_user(UserInfos {
        id: 1,
        role: RoleSlug::Root,
        profile_status: RoleStatus::Active,
    })
}
