//! Email, phone and password changes
//!
//! Each flow has three steps: request (new code, sent after commit), resend
//! (same code while it is valid) and confirm. Confirming an email or phone
//! change feeds the onboarding policy with what is still pending.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

use super::validate::{normalize_email, normalize_phone};
use super::{traced, IdentityService, Outbox};
use crate::audit;
use crate::auth::codes::{code_expiry, codes_match, generate_code};
use crate::auth::jwt::TokenPair;
use crate::auth::password::validate_password_policy;
use crate::error::{DomainError, DomainResult};
use crate::models::user::digits_only;
use crate::models::{AuditTable, RoleSlug, RoleStatus, Validation};
use crate::notification::templates;
use crate::notification::NotificationRequest;
use crate::policy::ActionFinished;
use crate::repository::IdentityStore;
use crate::telemetry::RequestContext;

/// Contact channel being changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactChange {
    Email,
    Phone,
}

/// Password reset confirmation
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordReset {
    pub national_id: String,
    pub password: String,
    pub code: String,
}

#[derive(Validate)]
struct EmailInput<'a> {
    #[validate(email(message = "invalid email"))]
    email: &'a str,
}

/// Slot of the validation row a flow works on
struct Slot {
    pending: bool,
    code: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    target: Option<String>,
}

impl Slot {
    fn of(validation: &Validation, change: ContactChange) -> Self {
        match change {
            ContactChange::Email => Self {
                pending: validation.email_pending(),
                code: validation.email_code.clone(),
                expires_at: validation.email_code_exp,
                target: validation.new_email.clone(),
            },
            ContactChange::Phone => Self {
                pending: validation.phone_pending(),
                code: validation.phone_code.clone(),
                expires_at: validation.phone_code_exp,
                target: validation.new_phone.clone(),
            },
        }
    }
}

fn not_pending(change: ContactChange) -> DomainError {
    match change {
        ContactChange::Email => DomainError::EmailChangeNotPending,
        ContactChange::Phone => DomainError::PhoneChangeNotPending,
    }
}

fn code_expired(change: ContactChange) -> DomainError {
    match change {
        ContactChange::Email => DomainError::EmailChangeCodeExpired,
        ContactChange::Phone => DomainError::PhoneChangeCodeExpired,
    }
}

fn code_invalid(change: ContactChange) -> DomainError {
    match change {
        ContactChange::Email => DomainError::EmailChangeCodeInvalid,
        ContactChange::Phone => DomainError::PhoneChangeCodeInvalid,
    }
}

fn already_in_use(change: ContactChange) -> DomainError {
    match change {
        ContactChange::Email => DomainError::EmailAlreadyInUse,
        ContactChange::Phone => DomainError::PhoneAlreadyInUse,
    }
}

/// Code message for the channel
fn code_message(change: ContactChange, to: &str, code: &str) -> NotificationRequest {
    match change {
        ContactChange::Email => {
            let email = templates::email_change_code(code);
            NotificationRequest::email(to, email.subject, email.body)
        }
        ContactChange::Phone => NotificationRequest::sms(to, templates::phone_change_code(code)),
    }
}

impl<S: IdentityStore> IdentityService<S> {
    /// Starts an email or phone change towards `value`
    pub async fn request_contact_change(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        change: ContactChange,
        value: &str,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.request_contact_change"), async {
            let target = match change {
                ContactChange::Email => {
                    let email = normalize_email(value);
                    EmailInput { email: &email }.validate()?;
                    email
                }
                ContactChange::Phone => normalize_phone(value)?,
            };

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .request_contact_change_in_tx(&mut tx, user_id, change, target, &mut outbox)
                .await;
            self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            info!(user_id, ?change, "Contact change requested");
            Ok(())
        })
        .await
    }

    async fn request_contact_change_in_tx(
        &self,
        tx: &mut S::Tx,
        user_id: i64,
        change: ContactChange,
        target: String,
        outbox: &mut Outbox,
    ) -> DomainResult<()> {
        if self.store.get_user_by_id(tx, user_id).await?.is_none() {
            return Err(DomainError::not_found("User"));
        }
        let in_use = match change {
            ContactChange::Email => self.store.email_in_use(tx, &target, Some(user_id)).await?,
            ContactChange::Phone => self.store.phone_in_use(tx, &target, Some(user_id)).await?,
        };
        if in_use {
            return Err(already_in_use(change));
        }

        let mut validation = self
            .store
            .lock_validation(tx, user_id)
            .await?
            .unwrap_or_else(|| Validation::new(user_id));
        let code = generate_code();
        let expires_at = code_expiry(Utc::now(), self.config.code_ttl());
        match change {
            ContactChange::Email => validation.set_email(target.clone(), code.clone(), expires_at),
            ContactChange::Phone => validation.set_phone(target.clone(), code.clone(), expires_at),
        }
        self.store.upsert_validation(tx, &validation).await?;

        outbox.send(code_message(change, &target, &code));
        Ok(())
    }

    /// Sends the pending code again, without renewing it
    pub async fn resend_contact_code(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        change: ContactChange,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.resend_contact_code"), async {
            let mut tx = self.store.begin().await?;
            let result = self.store.lock_validation(&mut tx, user_id).await;
            self.rollback(tx).await;

            let validation = result?.ok_or_else(|| not_pending(change))?;
            let slot = Slot::of(&validation, change);
            let (Some(code), Some(target)) = (slot.code.filter(|_| slot.pending), slot.target) else {
                return Err(not_pending(change));
            };
            if slot.expires_at.map(|exp| exp <= Utc::now()).unwrap_or(true) {
                return Err(code_expired(change));
            }

            let mut outbox = Outbox::default();
            outbox.send(code_message(change, &target, &code));
            self.flush(ctx, outbox).await;
            Ok(())
        })
        .await
    }

    /// Confirms an email or phone change
    ///
    /// Returns a fresh token pair when the confirmation completes onboarding
    /// of a non-realtor role (its claims changed).
    pub async fn confirm_contact_change(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        change: ContactChange,
        code: &str,
    ) -> DomainResult<Option<TokenPair>> {
        traced(ctx.span("identity.confirm_contact_change"), async {
            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .confirm_contact_change_in_tx(&mut tx, ctx, user_id, change, code, &mut outbox)
                .await;
            let tokens = self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            info!(user_id, ?change, "Contact change confirmed");
            Ok(tokens)
        })
        .await
    }

    async fn confirm_contact_change_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
        change: ContactChange,
        code: &str,
        outbox: &mut Outbox,
    ) -> DomainResult<Option<TokenPair>> {
        let mut validation = self
            .store
            .lock_validation(tx, user_id)
            .await?
            .ok_or_else(|| not_pending(change))?;
        let slot = Slot::of(&validation, change);
        let (Some(stored), Some(target)) = (slot.code.filter(|_| slot.pending), slot.target) else {
            return Err(not_pending(change));
        };
        if slot.expires_at.map(|exp| exp <= Utc::now()).unwrap_or(true) {
            return Err(code_expired(change));
        }
        if !codes_match(code, &stored) {
            return Err(code_invalid(change));
        }

        let mut user = self
            .store
            .get_user_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        let in_use = match change {
            ContactChange::Email => self.store.email_in_use(tx, &target, Some(user_id)).await?,
            ContactChange::Phone => self.store.phone_in_use(tx, &target, Some(user_id)).await?,
        };
        if in_use {
            return Err(already_in_use(change));
        }

        let previous = match change {
            ContactChange::Email => {
                validation.clear_email();
                std::mem::replace(&mut user.email, target)
            }
            ContactChange::Phone => {
                validation.clear_phone();
                std::mem::replace(&mut user.phone, target)
            }
        };
        self.store.update_user(tx, &user).await?;
        if validation.is_empty() {
            self.store.delete_validation(tx, user_id).await?;
        } else {
            self.store.upsert_validation(tx, &validation).await?;
        }

        let action = match change {
            ContactChange::Email => "email changed",
            ContactChange::Phone => "phone changed",
        };
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            action,
            Some(user_id),
            Some(json!({ "previous": previous })),
        )
        .await?;

        let mut role = self
            .store
            .get_active_user_role(tx, user_id)
            .await?
            .ok_or(DomainError::ActiveRoleMissing)?;
        let next = ActionFinished::after_contact_confirmation(
            validation.email_pending(),
            validation.phone_pending(),
        );
        let moved_to = self.apply_transition(tx, ctx, &mut role, next, outbox).await?;

        match moved_to {
            Some(RoleStatus::Active) if role.role_slug != RoleSlug::Realtor => {
                Ok(Some(self.mint(&role)?))
            }
            _ => Ok(None),
        }
    }

    /// Starts a password reset
    ///
    /// Unknown national ids succeed silently so the endpoint cannot be used
    /// to probe for accounts.
    pub async fn request_password_change(
        &self,
        ctx: &RequestContext,
        national_id: &str,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.request_password_change"), async {
            let national_id = digits_only(national_id);
            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .request_password_change_in_tx(&mut tx, &national_id, &mut outbox)
                .await;
            self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            Ok(())
        })
        .await
    }

    async fn request_password_change_in_tx(
        &self,
        tx: &mut S::Tx,
        national_id: &str,
        outbox: &mut Outbox,
    ) -> DomainResult<()> {
        let Some(account) = self.store.lock_account_by_national_id(tx, national_id).await? else {
            info!("Password reset requested for unknown national id");
            return Ok(());
        };
        let user = account.user;
        if user.permanently_blocked {
            return Err(DomainError::Locked("account is blocked".to_string()));
        }

        let mut validation = self
            .store
            .lock_validation(tx, user.id)
            .await?
            .unwrap_or_else(|| Validation::new(user.id));
        let code = generate_code();
        validation.set_password(code.clone(), code_expiry(Utc::now(), self.config.code_ttl()));
        self.store.upsert_validation(tx, &validation).await?;

        let email = templates::password_change_code(&code);
        outbox.send(NotificationRequest::email(&user.email, email.subject, email.body));
        info!(user_id = user.id, "Password reset requested");
        Ok(())
    }

    /// Emails the pending password code again
    pub async fn resend_password_code(&self, ctx: &RequestContext, national_id: &str) -> DomainResult<()> {
        traced(ctx.span("identity.resend_password_code"), async {
            let national_id = digits_only(national_id);
            let mut tx = self.store.begin().await?;
            let result = self.pending_password_code(&mut tx, &national_id).await;
            self.rollback(tx).await;

            let (email, code) = result?;
            let rendered = templates::password_change_code(&code);
            let mut outbox = Outbox::default();
            outbox.send(NotificationRequest::email(email, rendered.subject, rendered.body));
            self.flush(ctx, outbox).await;
            Ok(())
        })
        .await
    }

    async fn pending_password_code(
        &self,
        tx: &mut S::Tx,
        national_id: &str,
    ) -> DomainResult<(String, String)> {
        let account = self
            .store
            .lock_account_by_national_id(tx, national_id)
            .await?
            .ok_or(DomainError::PasswordChangeNotPending)?;
        let validation = self
            .store
            .lock_validation(tx, account.user.id)
            .await?
            .ok_or(DomainError::PasswordChangeNotPending)?;
        let code = validation
            .password_code
            .ok_or(DomainError::PasswordChangeNotPending)?;
        if validation
            .password_code_exp
            .map(|exp| exp <= Utc::now())
            .unwrap_or(true)
        {
            return Err(DomainError::PasswordChangeCodeExpired);
        }
        Ok((account.user.email, code))
    }

    /// Sets a new password with the emailed code
    ///
    /// Clears the failed-attempt counter. No tokens are minted: the user
    /// signs in with the new password.
    pub async fn confirm_password_change(
        &self,
        ctx: &RequestContext,
        reset: PasswordReset,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.confirm_password_change"), async {
            validate_password_policy(&reset.password)
                .map_err(|message| DomainError::validation("password", message))?;

            let mut tx = self.store.begin().await?;
            let result = self.confirm_password_change_in_tx(&mut tx, ctx, &reset).await;
            let user_id = self.finish(tx, result).await?;
            info!(security = true, user_id, "Password changed");
            Ok(())
        })
        .await
    }

    async fn confirm_password_change_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        reset: &PasswordReset,
    ) -> DomainResult<i64> {
        let national_id = digits_only(&reset.national_id);
        let account = self
            .store
            .lock_account_by_national_id(tx, &national_id)
            .await?
            .ok_or(DomainError::PasswordChangeNotPending)?;
        let mut user = account.user;

        let mut validation = self
            .store
            .lock_validation(tx, user.id)
            .await?
            .ok_or(DomainError::PasswordChangeNotPending)?;
        let stored = validation
            .password_code
            .clone()
            .ok_or(DomainError::PasswordChangeNotPending)?;
        if validation
            .password_code_exp
            .map(|exp| exp <= Utc::now())
            .unwrap_or(true)
        {
            return Err(DomainError::PasswordChangeCodeExpired);
        }
        if !codes_match(&reset.code, &stored) {
            return Err(DomainError::PasswordChangeCodeInvalid);
        }

        user.password_hash = self.hasher.hash(&reset.password)?;
        user.last_activity_at = Utc::now();
        self.store.update_user(tx, &user).await?;

        validation.clear_password();
        if validation.is_empty() {
            self.store.delete_validation(tx, user.id).await?;
        } else {
            self.store.upsert_validation(tx, &validation).await?;
        }
        self.store.delete_wrong_signin(tx, user.id).await?;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            "password changed",
            Some(user.id),
            None,
        )
        .await?;
        Ok(user.id)
    }
}
