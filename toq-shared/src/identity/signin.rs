//! Signin, brute-force lockout, refresh and signout

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::validate::{parse_device_id, require};
use super::{traced, IdentityService, Outbox};
use crate::audit;
use crate::auth::jwt::{TokenPair, UserInfos};
use crate::error::{DomainError, DomainResult};
use crate::events::SessionEvent;
use crate::models::user::digits_only;
use crate::models::{AuditTable, RoleStatus, User, UserRole, WrongSignin};
use crate::notification::templates::{self, AccountLocked};
use crate::notification::NotificationRequest;
use crate::repository::IdentityStore;
use crate::telemetry::RequestContext;

const TEMP_BLOCK_REASON: &str = "Too many failed signin attempts";

/// Credentials plus the device being signed in
#[derive(Debug, Clone, Deserialize)]
pub struct SigninRequest {
    pub national_id: String,
    pub password: String,
    pub device_token: String,
    /// Client-generated UUID
    pub device_id: String,
}

impl<S: IdentityStore> IdentityService<S> {
    /// Authenticates by national id and password
    ///
    /// Every rejection is the same opaque "invalid credentials", except a
    /// user without an active role (authorization). The transaction commits
    /// on those rejections so the failed-attempt counter and any block
    /// persist.
    pub async fn signin(&self, ctx: &RequestContext, request: SigninRequest) -> DomainResult<TokenPair> {
        traced(ctx.span("identity.signin"), async {
            require("national_id", &request.national_id)?;
            require("password", &request.password)?;
            require("device_token", &request.device_token)?;
            let device_id = parse_device_id(&request.device_id)?;
            let national_id = digits_only(&request.national_id);

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .signin_in_tx(&mut tx, ctx, &national_id, &request.password, &mut outbox)
                .await;

            let role = match result {
                Ok(role) => {
                    self.store.commit(tx).await?;
                    role
                }
                Err(e) if e.commits_on_signin() => {
                    self.store.commit(tx).await?;
                    self.flush(ctx, outbox).await;
                    return Err(e);
                }
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            };

            self.device_tokens
                .upsert(role.user_id, device_id, request.device_token.trim(), Utc::now())
                .await?;
            self.events
                .publish(ctx, SessionEvent::created(role.user_id, Some(device_id)));

            let tokens = self.mint(&role)?;
            info!(user_id = role.user_id, role = %role.role_slug, "Signin succeeded");
            Ok(tokens)
        })
        .await
    }

    async fn signin_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        national_id: &str,
        password: &str,
        outbox: &mut Outbox,
    ) -> DomainResult<UserRole> {
        let now = Utc::now();
        let account = match self.store.lock_account_by_national_id(tx, national_id).await? {
            Some(account) => account,
            None => {
                // Same cost as a real verification
                self.hasher.verify_or_dummy(password, None)?;
                warn!(security = true, "Signin for unknown national id");
                return Err(DomainError::invalid_credentials());
            }
        };
        let user = account.user;

        if user.permanently_blocked {
            self.hasher.verify_or_dummy(password, None)?;
            warn!(security = true, user_id = user.id, "Signin attempt on blocked account");
            return Err(DomainError::invalid_credentials());
        }

        let mut role = match account.active_role {
            Some(role) => role,
            None => {
                warn!(security = true, user_id = user.id, "Signin for user without active role");
                return Err(DomainError::Authorization("user has no active role".to_string()));
            }
        };

        if role.is_temp_blocked(now) || user.is_temp_blocked(now) {
            self.hasher.verify_or_dummy(password, None)?;
            warn!(
                security = true,
                user_id = user.id,
                blocked_until = ?role.blocked_until.or(user.blocked_until),
                "Signin attempt while temporarily blocked"
            );
            return Err(DomainError::invalid_credentials());
        }

        if !self.hasher.verify(password, &user.password_hash)? {
            self.process_failed_attempt(tx, ctx, &user, &mut role, now, outbox)
                .await?;
            return Err(DomainError::invalid_credentials());
        }

        self.store.delete_wrong_signin(tx, user.id).await?;
        if user.blocked_until.is_some() {
            self.store.set_user_blocked_until(tx, user.id, None).await?;
        }
        if role.lift_temp_block() {
            self.store.update_user_role(tx, &role).await?;
            info!(security = true, user_id = user.id, status = %role.status, "Expired temporary block cleared on signin");
        }
        self.store.touch_last_activity(tx, user.id, now).await?;

        Ok(role)
    }

    /// Counts a failed attempt and blocks the user once the threshold is hit
    async fn process_failed_attempt(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user: &User,
        role: &mut UserRole,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> DomainResult<()> {
        // Any block still recorded here has run out, the caller rejects
        // live ones. Its attempts no longer count.
        let block_expired = role.status == RoleStatus::TempBlocked || user.blocked_until.is_some();
        let mut tracker = if block_expired {
            if role.lift_temp_block() {
                self.store.update_user_role(tx, role).await?;
            }
            self.store.set_user_blocked_until(tx, user.id, None).await?;
            info!(security = true, user_id = user.id, "Expired temporary block cleared on failed signin");
            WrongSignin::new(user.id, now)
        } else {
            self.store
                .get_wrong_signin(tx, user.id)
                .await?
                .unwrap_or_else(|| WrongSignin::new(user.id, now))
        };
        let attempts = tracker.register_failure(now);
        self.store.upsert_wrong_signin(tx, &tracker).await?;

        warn!(security = true, user_id = user.id, failed_attempts = attempts, "Signin failed");
        if attempts < self.config.max_wrong_signin_attempts {
            return Ok(());
        }

        let until = now + self.config.temp_block_duration();
        role.apply_temp_block(until, TEMP_BLOCK_REASON);
        self.store.update_user_role(tx, role).await?;
        self.store.set_user_blocked_until(tx, user.id, Some(until)).await?;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "temporary block after failed signins",
            Some(user.id),
            Some(json!({
                "user_id": user.id,
                "failed_attempts": attempts,
                "blocked_until": until.to_rfc3339(),
            })),
        )
        .await?;

        warn!(
            security = true,
            user_id = user.id,
            failed_attempts = attempts,
            blocked_until = %until,
            "User temporarily blocked"
        );

        if attempts != self.config.max_wrong_signin_attempts {
            return Ok(());
        }
        let email = templates::account_locked(&AccountLocked {
            nickname: &user.nickname,
            blocked_at: now,
            unblock_at: until,
            failed_attempts: attempts,
            reset_password_url: &self.config.reset_password_url,
        });
        outbox.send(NotificationRequest::email(&user.email, email.subject, email.body));
        Ok(())
    }

    /// Exchanges a refresh token for a fresh pair
    pub async fn refresh(&self, ctx: &RequestContext, refresh_token: &str) -> DomainResult<TokenPair> {
        traced(ctx.span("identity.refresh"), async {
            let claims = self.tokens.validate_refresh(refresh_token)?;
            if self.blocklist.exists(&claims.jti).await? {
                return Err(DomainError::Authentication("invalid token".to_string()));
            }

            let mut tx = self.store.begin_read_only().await?;
            let result = self.store.get_account_by_id(&mut tx, claims.user_info.id).await;
            self.rollback(tx).await;

            let account = result?.ok_or_else(DomainError::invalid_credentials)?;
            if account.user.permanently_blocked {
                return Err(DomainError::Authorization("account blocked".to_string()));
            }
            let role = account.active_role.ok_or(DomainError::ActiveRoleMissing)?;
            if role.status == RoleStatus::Blocked {
                return Err(DomainError::Authorization("account blocked".to_string()));
            }

            let tokens = self.mint(&role)?;
            self.events.publish(ctx, SessionEvent::rotated(role.user_id, None));
            Ok(tokens)
        })
        .await
    }

    /// Ends the caller's session
    ///
    /// Returns an already expired pair for the client to store in place of
    /// its tokens. The access token's id is blocklisted for the rest of its
    /// lifetime and, when `device_id` is given, the device's push token is
    /// pruned before returning.
    pub async fn signout(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        device_id: Option<Uuid>,
    ) -> DomainResult<TokenPair> {
        traced(ctx.span("identity.signout"), async {
            let claims = self.tokens.validate_access(access_token)?;
            let user_id = claims.user_info.id;

            if let Some(ttl) = claims.remaining_ttl() {
                self.blocklist.add(&claims.jti, ttl).await?;
            }

            let handles = self
                .events
                .publish(ctx, SessionEvent::revoked(user_id, device_id));
            for joined in futures::future::join_all(handles).await {
                if let Err(e) = joined {
                    warn!(user_id, error = %e, "Session event task failed");
                }
            }

            info!(user_id, "Signed out");
            Ok(self.tokens.mint_expired_pair(&claims.user_info)?)
        })
        .await
    }

    /// Resolves a bearer access token to the caller's identity
    ///
    /// Rejects tokens that fail validation or whose id was blocklisted by
    /// signout.
    pub async fn authenticate(&self, access_token: &str) -> DomainResult<UserInfos> {
        let claims = self.tokens.validate_access(access_token)?;
        if self.blocklist.exists(&claims.jti).await? {
            return Err(DomainError::Authentication("invalid token".to_string()));
        }
        Ok(claims.user_info)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::blocklist::TokenBlocklist;
    use crate::error::ErrorKind;
    use crate::models::RoleSlug;
    use crate::notification::Channel;
    use crate::repository::{TransactionPort, UserRepository};

    async fn owner(h: &Harness) -> i64 {
        let tokens = h
            .service
            .signup(
                &RequestContext::generate(),
                signup_request(RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777"),
                device(),
            )
            .await
            .unwrap();
        h.service.tokens().validate_access(&tokens.access_token).unwrap().user_info.id
    }

    fn credentials(password: &str) -> SigninRequest {
        SigninRequest {
            national_id: "529.982.247-25".to_string(),
            password: password.to_string(),
            device_token: "fcm-token-1".to_string(),
            device_id: device().device_id,
        }
    }

    #[tokio::test]
    async fn test_authenticate_rejects_signed_out_token() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();
        let tokens = h.service.signin(&ctx, credentials(PASSWORD)).await.unwrap();

        let user = h.service.authenticate(&tokens.access_token).await.unwrap();
        assert_eq!(user.id, user_id);
        assert!(h.service.authenticate(&tokens.refresh_token).await.is_err());

        h.service.signout(&ctx, &tokens.access_token, None).await.unwrap();
        let err = h.service.authenticate(&tokens.access_token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_success_clears_wrong_signin() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();

        let err = h.service.signin(&ctx, credentials("Wrong1234!")).await.unwrap_err();
        assert_eq!(err, DomainError::invalid_credentials());
        assert_eq!(h.store.wrong_signin(user_id).unwrap().failed_attempts, 1);

        h.service.signin(&ctx, credentials(PASSWORD)).await.unwrap();
        assert!(h.store.wrong_signin(user_id).is_none());
    }

    #[tokio::test]
    async fn test_third_failure_blocks_even_correct_password() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();

        for expected in 1..=3 {
            let before = Utc::now();
            let err = h.service.signin(&ctx, credentials("Wrong1234!")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert_eq!(h.store.wrong_signin(user_id).unwrap().failed_attempts, expected);
            if expected == 3 {
                let role = h.store.user_roles(user_id).into_iter().find(|r| r.is_active).unwrap();
                assert_eq!(role.status, RoleStatus::TempBlocked);
                assert_eq!(role.status_before_block, Some(RoleStatus::PendingProfile));
                let until = role.blocked_until.unwrap();
                assert!(until >= before + chrono::Duration::minutes(15));
                assert!(until <= Utc::now() + chrono::Duration::minutes(15));
                assert_eq!(h.store.user(user_id).unwrap().blocked_until, Some(until));
            }
        }

        let err = h.service.signin(&ctx, credentials(PASSWORD)).await.unwrap_err();
        assert_eq!(err, DomainError::invalid_credentials());

        settle().await;
        let locked = h
            .gateway
            .sent()
            .into_iter()
            .filter(|r| r.channel == Channel::Email)
            .filter(|r| r.subject.as_deref() == Some("TOQ - Alerta de Segurança"))
            .count();
        assert_eq!(locked, 1);
    }

    #[tokio::test]
    async fn test_expired_block_is_lifted_on_signin() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();
        for _ in 0..3 {
            let _ = h.service.signin(&ctx, credentials("Wrong1234!")).await;
        }

        // Move the block into the past
        let store = h.store.as_ref();
        let mut tx = store.begin().await.unwrap();
        let mut role = store.get_active_user_role(&mut tx, user_id).await.unwrap().unwrap();
        let past = Utc::now() - chrono::Duration::minutes(1);
        role.blocked_until = Some(past);
        store.update_user_role(&mut tx, &role).await.unwrap();
        store.set_user_blocked_until(&mut tx, user_id, Some(past)).await.unwrap();
        store.commit(tx).await.unwrap();

        let tokens = h.service.signin(&ctx, credentials(PASSWORD)).await.unwrap();
        let claims = h.service.tokens().validate_access(&tokens.access_token).unwrap();
        assert_eq!(claims.user_info.profile_status, RoleStatus::PendingProfile);
        assert!(h.store.user(user_id).unwrap().blocked_until.is_none());
    }

    #[tokio::test]
    async fn test_failure_after_expired_block_starts_a_new_count() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();
        for _ in 0..3 {
            let _ = h.service.signin(&ctx, credentials("Wrong1234!")).await;
        }

        let store = h.store.as_ref();
        let mut tx = store.begin().await.unwrap();
        let mut role = store.get_active_user_role(&mut tx, user_id).await.unwrap().unwrap();
        let past = Utc::now() - chrono::Duration::minutes(1);
        role.blocked_until = Some(past);
        store.update_user_role(&mut tx, &role).await.unwrap();
        store.set_user_blocked_until(&mut tx, user_id, Some(past)).await.unwrap();
        store.commit(tx).await.unwrap();

        let err = h.service.signin(&ctx, credentials("Wrong1234!")).await.unwrap_err();
        assert_eq!(err, DomainError::invalid_credentials());
        assert_eq!(h.store.wrong_signin(user_id).unwrap().failed_attempts, 1);

        let role = h.store.user_roles(user_id).into_iter().find(|r| r.is_active).unwrap();
        assert_eq!(role.status, RoleStatus::PendingProfile);
        assert!(role.blocked_until.is_none());
        assert!(h.store.user(user_id).unwrap().blocked_until.is_none());

        settle().await;
        let locked = h
            .gateway
            .sent()
            .into_iter()
            .filter(|r| r.subject.as_deref() == Some("TOQ - Alerta de Segurança"))
            .count();
        assert_eq!(locked, 1);

        // the correct password still works
        h.service.signin(&ctx, credentials(PASSWORD)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_user_is_opaque() {
        let h = harness();
        let err = h
            .service
            .signin(&RequestContext::generate(), credentials(PASSWORD))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::invalid_credentials());
        // Authentication failures commit
        assert_eq!(h.store.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn test_template_user_cannot_sign_in() {
        let h = harness();
        let mut request = credentials("anything");
        request.national_id = "00000000191".to_string();
        let err = h.service.signin(&RequestContext::generate(), request).await.unwrap_err();
        assert_eq!(err, DomainError::invalid_credentials());
    }

    #[tokio::test]
    async fn test_refresh_and_signout() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();
        let tokens = h.service.signin(&ctx, credentials(PASSWORD)).await.unwrap();

        let refreshed = h.service.refresh(&ctx, &tokens.refresh_token).await.unwrap();
        assert!(h.service.refresh(&ctx, &tokens.access_token).await.is_err());

        let device_id = parse_device_id(&device().device_id).unwrap();
        let expired = h
            .service
            .signout(&ctx, &refreshed.access_token, Some(device_id))
            .await
            .unwrap();
        assert!(h.service.tokens().validate_access(&expired.access_token).is_err());

        let claims = h.service.tokens().validate_access(&refreshed.access_token).unwrap();
        assert!(h.blocklist.exists(&claims.jti).await.unwrap());
        assert!(h.store.device_tokens(user_id).is_empty());
    }
}
