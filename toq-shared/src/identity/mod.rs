//! Identity and session service
//!
//! [`IdentityService`] owns account creation, signin and token lifecycle,
//! contact and password changes, role management, agency invitations,
//! account deletion and manual review. It is generic over one
//! [`IdentityStore`] and receives every other collaborator as a port in
//! [`IdentityDeps`], assembled by the composition root of each binary.
//!
//! # Transactions
//!
//! Every public operation opens one transaction, runs its reads and writes
//! inside it and commits on success. Notifications are collected in an
//! outbox while the transaction is open and dispatched only after commit,
//! on detached tasks correlated with the caller's [`RequestContext`]. Signin
//! is the exception to "rollback on error": authentication, authorization
//! and locked failures commit so that the failed-attempt counter persists.
//!
//! # Example
//!
//! ```no_run
//! use toq_shared::identity::{IdentityService, SigninRequest};
//! use toq_shared::memory::MemoryStore;
//! use toq_shared::telemetry::RequestContext;
//!
//! # async fn example(service: IdentityService<MemoryStore>) -> Result<(), toq_shared::error::DomainError> {
//! let ctx = RequestContext::generate();
//! let tokens = service
//!     .signin(&ctx, SigninRequest {
//!         national_id: "529.982.247-25".into(),
//!         password: "Abcdefgh1!".into(),
//!         device_token: "fcm-token".into(),
//!         device_id: "8f14e45f-ceea-4e7a-9c3b-5a1d2c3e4f50".into(),
//!     })
//!     .await?;
//! println!("access token expires at {}", tokens.access_expires_at);
//! # Ok(())
//! # }
//! ```

mod contact;
mod invites;
mod lifecycle;
mod profile;
mod pruner;
mod roles;
mod signin;
mod signup;
pub mod validate;

pub use contact::{ContactChange, PasswordReset};
pub use lifecycle::DeletionReport;
pub use profile::{OnboardingStatus, ProfileUpdate, UserProfile};
pub use pruner::DeviceTokenPruner;
pub use roles::RoleAssignment;
pub use signin::SigninRequest;
pub use signup::{DeviceInfo, SignupRequest, SystemUserRequest};

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn, Instrument, Span};

use crate::auth::jwt::{TokenIssuer, TokenPair, UserInfos};
use crate::auth::password::PasswordHashing;
use crate::blocklist::TokenBlocklist;
use crate::config::IdentityConfig;
use crate::error::{DomainError, DomainResult};
use crate::events::SessionEventBus;
use crate::models::{RoleStatus, UserRole};
use crate::notification::templates::{self, Rendered};
use crate::notification::{NotificationRequest, Notifier};
use crate::policy::{ActionFinished, NotificationKind, PolicyError, TransitionPolicy};
use crate::repository::{
    DeviceTokenRegistry, IdentityStore, ListingCleanupPort, PermissionCache, PhotoSessionPort,
};
use crate::storage::StorageService;
use crate::telemetry::{mark_span_error, RequestContext};
use crate::verification::IdentityVerifier;

/// Collaborators wired by the composition root
pub struct IdentityDeps<S> {
    pub store: Arc<S>,
    pub notifier: Arc<dyn Notifier>,
    pub device_tokens: Arc<dyn DeviceTokenRegistry>,
    pub blocklist: Arc<dyn TokenBlocklist>,
    pub permissions: Arc<dyn PermissionCache>,
    pub storage: StorageService,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub listings: Arc<dyn ListingCleanupPort>,
    pub photo_sessions: Arc<dyn PhotoSessionPort>,
    pub policy: Arc<TransitionPolicy>,
    pub tokens: TokenIssuer,
    pub events: SessionEventBus,
    pub config: IdentityConfig,
}

/// Identity core
pub struct IdentityService<S: IdentityStore> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    device_tokens: Arc<dyn DeviceTokenRegistry>,
    blocklist: Arc<dyn TokenBlocklist>,
    permissions: Arc<dyn PermissionCache>,
    storage: StorageService,
    verifier: Arc<dyn IdentityVerifier>,
    listings: Arc<dyn ListingCleanupPort>,
    photo_sessions: Arc<dyn PhotoSessionPort>,
    policy: Arc<TransitionPolicy>,
    tokens: TokenIssuer,
    events: SessionEventBus,
    hasher: PasswordHashing,
    config: IdentityConfig,
}

impl<S: IdentityStore> std::fmt::Debug for IdentityService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<S: IdentityStore> IdentityService<S> {
    /// Builds the service and subscribes the device-token pruner to the
    /// session bus
    ///
    /// # Errors
    ///
    /// Fails if the password hasher cannot be initialized with the configured
    /// parameters.
    pub fn new(deps: IdentityDeps<S>) -> DomainResult<Self> {
        let hasher = PasswordHashing::new(deps.config.hash_params)?;
        deps.events
            .subscribe(Arc::new(DeviceTokenPruner::new(Arc::clone(&deps.device_tokens))));

        Ok(Self {
            store: deps.store,
            notifier: deps.notifier,
            device_tokens: deps.device_tokens,
            blocklist: deps.blocklist,
            permissions: deps.permissions,
            storage: deps.storage,
            verifier: deps.verifier,
            listings: deps.listings,
            photo_sessions: deps.photo_sessions,
            policy: deps.policy,
            tokens: deps.tokens,
            events: deps.events,
            hasher,
            config: deps.config,
        })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn events(&self) -> &SessionEventBus {
        &self.events
    }

    /// Commits on `Ok`, rolls back on `Err`
    async fn finish<T>(&self, tx: S::Tx, result: DomainResult<T>) -> DomainResult<T> {
        match result {
            Ok(value) => {
                self.store.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn rollback(&self, tx: S::Tx) {
        if let Err(rb) = self.store.rollback(tx).await {
            warn!(error = %rb, "Failed to roll back transaction");
        }
    }

    /// Dispatches what was queued while the transaction was open
    async fn flush(&self, ctx: &RequestContext, outbox: Outbox) {
        if outbox.items.is_empty() {
            return;
        }
        let snapshot = ctx.snapshot();
        for item in outbox.items {
            match item {
                Outgoing::Direct(request) => {
                    if let Err(e) = self.notifier.dispatch(&snapshot, request) {
                        warn!(error = %e, "Notification rejected before dispatch");
                    }
                }
                Outgoing::PushToUser { user_id, message } => {
                    self.push_to_user(&snapshot, user_id, &message).await;
                }
            }
        }
    }

    /// Fans a push out to every opted-in device of the user, best effort
    async fn push_to_user(
        &self,
        snapshot: &crate::telemetry::ContextSnapshot,
        user_id: i64,
        message: &Rendered,
    ) {
        let tokens = match self.device_tokens.list_tokens_by_user_if_opted_in(user_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to list device tokens for push");
                return;
            }
        };
        if tokens.is_empty() {
            debug!(user_id, "No opted-in device, push skipped");
            return;
        }
        for token in tokens {
            let request =
                NotificationRequest::push(token.push_token, &message.subject, &message.body);
            if let Err(e) = self.notifier.dispatch(snapshot, request) {
                warn!(user_id, error = %e, "Push rejected before dispatch");
            }
        }
    }

    /// Evaluates the policy for the binding and applies the result in `tx`
    ///
    /// A missing rule leaves the status untouched and returns `None`.
    async fn apply_transition(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        role: &mut UserRole,
        action: ActionFinished,
        outbox: &mut Outbox,
    ) -> DomainResult<Option<RoleStatus>> {
        let transition = match self.policy.evaluate(role.role_slug, role.status, action) {
            Ok(transition) => transition,
            Err(PolicyError::NoRule { .. }) => {
                debug!(
                    user_id = role.user_id,
                    role = %role.role_slug,
                    status = %role.status,
                    action = %action,
                    "No transition rule, status kept"
                );
                return Ok(None);
            }
            Err(e) => return Err(DomainError::internal(e)),
        };

        if let Some(message) = transition_message(transition.notification) {
            outbox.push_to_user(role.user_id, message);
        }
        if !transition.changed {
            return Ok(None);
        }

        let from = role.status;
        role.status = transition.to;
        self.store.update_user_role(tx, role).await?;
        crate::audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            crate::models::AuditTable::UserRoles,
            format!("status transition after {}", action),
            None,
            Some(serde_json::json!({
                "user_id": role.user_id,
                "status_from": from.as_i16(),
                "status_to": transition.to.as_i16(),
            })),
        )
        .await?;
        debug!(user_id = role.user_id, from = %from, to = %transition.to, "Status transition applied");
        Ok(Some(transition.to))
    }

    /// Conflict with `message` when no rule moves the binding on `action`
    fn ensure_rule(
        &self,
        role: &UserRole,
        action: ActionFinished,
        message: &str,
    ) -> DomainResult<()> {
        match self.policy.evaluate(role.role_slug, role.status, action) {
            Ok(_) => Ok(()),
            Err(PolicyError::NoRule { .. }) => Err(DomainError::conflict(message)),
            Err(e) => Err(DomainError::internal(e)),
        }
    }

    fn infos(role: &UserRole) -> UserInfos {
        UserInfos {
            id: role.user_id,
            role: role.role_slug,
            profile_status: role.status,
        }
    }

    fn mint(&self, role: &UserRole) -> DomainResult<TokenPair> {
        Ok(self.tokens.mint_pair(&Self::infos(role))?)
    }

    /// Best-effort permission cache invalidation
    async fn invalidate_permissions(&self, user_id: i64) {
        if let Err(e) = self.permissions.invalidate(user_id).await {
            warn!(user_id, error = %e, "Failed to invalidate permission cache");
        }
    }
}

/// Push text for the notification kinds a transition may carry
fn transition_message(kind: NotificationKind) -> Option<Rendered> {
    match kind {
        NotificationKind::ProfileCompleted => Some(templates::profile_completed_push()),
        NotificationKind::CreciUnderReview => Some(templates::creci_under_review_push()),
        NotificationKind::CreciValidated => Some(templates::manual_review_push(RoleStatus::Active)),
        NotificationKind::CreciRefused => {
            Some(templates::manual_review_push(RoleStatus::RefusedDocument))
        }
        // Invitation and code messages carry data the rule cannot provide;
        // the owning flow renders them itself
        _ => None,
    }
}

/// Runs `future` under `span`, recording the error on it
async fn traced<T, F>(span: Span, future: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    let result = future.instrument(span.clone()).await;
    if let Err(e) = &result {
        mark_span_error(&span, e);
    }
    result
}

/// Notification queued until commit
#[derive(Debug)]
enum Outgoing {
    Direct(NotificationRequest),
    PushToUser { user_id: i64, message: Rendered },
}

#[derive(Debug, Default)]
struct Outbox {
    items: Vec<Outgoing>,
}

impl Outbox {
    fn send(&mut self, request: NotificationRequest) {
        self.items.push(Outgoing::Direct(request));
    }

    fn push_to_user(&mut self, user_id: i64, message: Rendered) {
        self.items.push(Outgoing::PushToUser { user_id, message });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Service assembled over the in-memory adapters

    use std::sync::Arc;

    use super::*;
    use crate::auth::jwt::JwtConfig;
    use crate::blocklist::MemoryBlocklist;
    use crate::memory::{
        MemoryObjectStore, MemoryPhotoSessions, MemoryStore, RecordingGateway,
        RecordingListingCleanup, RecordingPermissionCache,
    };
    use crate::notification::NotificationService;
    use crate::policy::YamlStrSource;
    use crate::storage::StorageConfig;
    use crate::verification::{CepAddress, StaticIdentityVerifier};

    pub const OWNER_CPF: &str = "52998224725";
    pub const REALTOR_CPF: &str = "11144477735";
    pub const AGENCY_CNPJ: &str = "11222333000181";
    pub const PASSWORD: &str = "Abcdefgh1!";

    pub struct Harness {
        pub service: IdentityService<MemoryStore>,
        pub store: Arc<MemoryStore>,
        pub gateway: Arc<RecordingGateway>,
        pub objects: Arc<MemoryObjectStore>,
        pub blocklist: Arc<MemoryBlocklist>,
        pub permissions: Arc<RecordingPermissionCache>,
        pub listings: Arc<RecordingListingCleanup>,
        pub photo_sessions: Arc<MemoryPhotoSessions>,
    }

    pub fn birth_date() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(1990, 5, 17).unwrap_or_default()
    }

    pub fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let blocklist = Arc::new(MemoryBlocklist::new());
        let permissions = Arc::new(RecordingPermissionCache::new());
        let listings = Arc::new(RecordingListingCleanup::new());
        let photo_sessions = Arc::new(MemoryPhotoSessions::new());
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

        let policy = TransitionPolicy::load(Box::new(YamlStrSource::builtin()))
            .unwrap_or_else(|e| panic!("builtin rules must load: {}", e));

        let service = IdentityService::new(IdentityDeps {
            store: Arc::clone(&store),
            notifier: Arc::new(NotificationService::new(gateway.clone())),
            device_tokens: store.clone(),
            blocklist: blocklist.clone(),
            permissions: permissions.clone(),
            storage: StorageService::new(objects.clone(), StorageConfig::default()),
            verifier: Arc::new(verifier),
            listings: listings.clone(),
            photo_sessions: photo_sessions.clone(),
            policy: Arc::new(policy),
            tokens: TokenIssuer::new(JwtConfig::for_secret("test-secret-with-at-least-32-bytes!!")),
            events: SessionEventBus::new(),
            config: IdentityConfig::for_test(),
        })
        .unwrap();

        Harness {
            service,
            store,
            gateway,
            objects,
            blocklist,
            permissions,
            listings,
            photo_sessions,
        }
    }

    pub fn device() -> DeviceInfo {
        DeviceInfo {
            device_token: "fcm-token-1".to_string(),
            device_id: "8f14e45f-ceea-4e7a-9c3b-5a1d2c3e4f50".to_string(),
            ip: Some("127.0.0.1".to_string()),
            user_agent: Some("toq-tests".to_string()),
        }
    }

    pub fn signup_request(
        role: crate::models::RoleSlug,
        national_id: &str,
        email: &str,
        phone: &str,
    ) -> SignupRequest {
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
            role: crate::models::RoleSlug::Root,
            profile_status: RoleStatus::Active,
        })
    }

    /// Signs a user up and returns its id
    pub async fn signed_up(
        h: &Harness,
        role: crate::models::RoleSlug,
        national_id: &str,
        email: &str,
        phone: &str,
    ) -> i64 {
        let tokens = h
            .service
            .signup(
                &RequestContext::generate(),
                signup_request(role, national_id, email, phone),
                device(),
            )
            .await
            .unwrap();
        h.service.tokens().validate_access(&tokens.access_token).unwrap().user_info.id
    }

    /// Lets detached notification tasks run
    pub async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
