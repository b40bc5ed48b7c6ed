//! Account creation: self-service signup, admin-created system users and
//! alternative roles

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use super::validate::{
    normalize_cnpj, normalize_cpf, normalize_email, normalize_phone, parse_device_id, require,
};
use super::{traced, IdentityService, Outbox, SigninRequest};
use crate::audit;
use crate::auth::codes::{code_expiry, generate_code};
use crate::auth::jwt::TokenPair;
use crate::auth::password::{generate_strong_password, validate_password_policy};
use crate::error::{DomainError, DomainResult};
use crate::models::{
    Address, AuditTable, NewUser, NewUserRole, Role, RoleSlug, RoleStatus, User, UserRole,
    Validation,
};
use crate::notification::templates;
use crate::notification::NotificationRequest;
use crate::repository::IdentityStore;
use crate::telemetry::RequestContext;

/// Self-service signup payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    pub role: RoleSlug,
    /// CPF for owners and realtors, CNPJ for agencies; punctuation allowed
    pub national_id: String,
    #[validate(length(min = 1, max = 50, message = "nickname must have 1 to 50 characters"))]
    pub nickname: String,
    #[validate(email(message = "invalid email"))]
    pub email: String,
    pub phone: String,
    /// Required for individuals
    pub birth_date: Option<NaiveDate>,
    pub zip_code: String,
    #[validate(length(min = 1, max = 10, message = "address number is required"))]
    pub number: String,
    pub complement: Option<String>,
    pub password: String,
    #[serde(default)]
    pub opt_in: bool,
}

/// Device presenting the credentials
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub device_token: String,
    /// Client-generated UUID
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Admin payload for root, photographer and admin accounts
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SystemUserRequest {
    pub role: RoleSlug,
    pub national_id: String,
    #[validate(length(min = 1, max = 120, message = "full name is required"))]
    pub full_name: String,
    #[validate(length(min = 1, max = 50, message = "nickname must have 1 to 50 characters"))]
    pub nickname: String,
    #[validate(email(message = "invalid email"))]
    pub email: String,
    pub phone: String,
    pub birth_date: Option<NaiveDate>,
    /// Overrides the template address when given together with `number`
    pub zip_code: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
}

/// Normalized identity fields shared by both creation paths
struct Contacts {
    national_id: String,
    email: String,
    phone: String,
}

impl<S: IdentityStore> IdentityService<S> {
    /// Creates an owner, realtor or agency account and signs it in
    ///
    /// Email and phone start pending: codes for both are sent after commit.
    pub async fn signup(
        &self,
        ctx: &RequestContext,
        request: SignupRequest,
        device: DeviceInfo,
    ) -> DomainResult<TokenPair> {
        traced(ctx.span("identity.signup"), async {
            require("device_token", &device.device_token)?;
            parse_device_id(&device.device_id)?;
            request.validate()?;

            let password = request.password.clone();
            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self.signup_in_tx(&mut tx, ctx, request, &mut outbox).await;
            let user = self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;

            info!(
                user_id = user.id,
                ip = device.ip.as_deref().unwrap_or("-"),
                user_agent = device.user_agent.as_deref().unwrap_or("-"),
                "Account created"
            );

            self.signin(
                ctx,
                SigninRequest {
                    national_id: user.national_id,
                    password,
                    device_token: device.device_token,
                    device_id: device.device_id,
                },
            )
            .await
        })
        .await
    }

    async fn signup_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        request: SignupRequest,
        outbox: &mut Outbox,
    ) -> DomainResult<User> {
        let role = self.role_for_signup(tx, request.role).await?;
        validate_password_policy(&request.password)
            .map_err(|message| DomainError::validation("password", message))?;

        let contacts = self
            .check_contacts(tx, request.role, &request.national_id, &request.email, &request.phone)
            .await?;

        let full_name = if request.role == RoleSlug::Agency {
            self.verifier
                .verify_cnpj(&contacts.national_id)
                .await?
                .ok_or_else(|| DomainError::validation("national_id", "CNPJ could not be verified"))?
        } else {
            let birth_date = request
                .birth_date
                .ok_or_else(|| DomainError::validation("birth_date", "is required"))?;
            self.verifier
                .verify_cpf(&contacts.national_id, birth_date)
                .await?
                .ok_or_else(|| {
                    DomainError::validation("national_id", "CPF and birth date do not match")
                })?
        };

        let address = self
            .lookup_address(&request.zip_code, &request.number, request.complement.as_deref())
            .await?;
        let password_hash = self.hasher.hash(&request.password)?;

        let user = self
            .store
            .create_user(
                tx,
                NewUser {
                    national_id: contacts.national_id,
                    full_name,
                    nickname: request.nickname.trim().to_string(),
                    email: contacts.email.clone(),
                    phone: contacts.phone.clone(),
                    birth_date: request.birth_date,
                    address,
                    password_hash,
                    opt_in: request.opt_in,
                },
            )
            .await?;

        self.store
            .create_user_role(
                tx,
                NewUserRole {
                    user_id: user.id,
                    role_id: role.id,
                    role_slug: role.slug,
                    is_active: true,
                    status: role.slug.initial_status(),
                    status_reason: None,
                    expires_at: None,
                },
            )
            .await?;

        let now = Utc::now();
        let expires_at = code_expiry(now, self.config.code_ttl());
        let email_code = generate_code();
        let phone_code = generate_code();
        let mut validation = Validation::new(user.id);
        validation.set_email(contacts.email.clone(), email_code.clone(), expires_at);
        validation.set_phone(contacts.phone.clone(), phone_code.clone(), expires_at);
        self.store.upsert_validation(tx, &validation).await?;

        let email = templates::email_change_code(&email_code);
        outbox.send(NotificationRequest::email(&contacts.email, email.subject, email.body));
        outbox.send(NotificationRequest::sms(
            &contacts.phone,
            templates::phone_change_code(&phone_code),
        ));

        self.storage.create_user_folder(user.id).await?;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            format!("created {} account", role.slug),
            Some(user.id),
            None,
        )
        .await?;

        Ok(user)
    }

    /// Creates a root, photographer or admin account
    ///
    /// The password is generated and never returned: the welcome email links
    /// to the password reset flow.
    pub async fn create_system_user(
        &self,
        ctx: &RequestContext,
        request: SystemUserRequest,
    ) -> DomainResult<User> {
        traced(ctx.span("identity.create_system_user"), async {
            require_admin(ctx)?;
            request.validate()?;

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self.create_system_user_in_tx(&mut tx, ctx, request, &mut outbox).await;
            let (user, role) = self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;

            if role.slug == RoleSlug::Photographer {
                // The agenda refresher provisions it later if this fails
                if let Err(e) = self
                    .photo_sessions
                    .ensure_agenda(user.id, self.config.agenda_horizon_months)
                    .await
                {
                    warn!(user_id = user.id, error = %e, "Failed to provision photographer agenda");
                }
            }

            info!(user_id = user.id, role = %role.slug, "System user created");
            Ok(user)
        })
        .await
    }

    async fn create_system_user_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        request: SystemUserRequest,
        outbox: &mut Outbox,
    ) -> DomainResult<(User, Role)> {
        let role = self
            .store
            .get_role_by_slug(tx, request.role)
            .await?
            .ok_or_else(|| DomainError::validation("role", "unknown role"))?;
        if !role.is_system_role {
            return Err(DomainError::validation("role", "role is not a system role"));
        }

        let contacts = self
            .check_contacts(tx, role.slug, &request.national_id, &request.email, &request.phone)
            .await?;

        let address = match (request.zip_code.as_deref(), request.number.as_deref()) {
            (Some(zip), Some(number)) if !zip.trim().is_empty() && !number.trim().is_empty() => {
                self.lookup_address(zip, number, request.complement.as_deref())
                    .await?
            }
            _ => {
                let template = self
                    .store
                    .get_user_by_id(tx, self.config.template_user_id)
                    .await?
                    .ok_or_else(|| DomainError::internal("template user missing"))?;
                template.address
            }
        };

        let password = generate_strong_password(self.config.system_password_length);
        let password_hash = self.hasher.hash(&password)?;

        let user = self
            .store
            .create_user(
                tx,
                NewUser {
                    national_id: contacts.national_id,
                    full_name: request.full_name.trim().to_string(),
                    nickname: request.nickname.trim().to_string(),
                    email: contacts.email,
                    phone: contacts.phone,
                    birth_date: request.birth_date,
                    address,
                    password_hash,
                    opt_in: false,
                },
            )
            .await?;

        self.store
            .create_user_role(
                tx,
                NewUserRole {
                    user_id: user.id,
                    role_id: role.id,
                    role_slug: role.slug,
                    is_active: true,
                    status: RoleStatus::Active,
                    status_reason: None,
                    expires_at: None,
                },
            )
            .await?;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            format!("created system user ({})", role.slug),
            None,
            Some(json!({ "user_id": user.id })),
        )
        .await?;

        let welcome =
            templates::system_user_welcome(&user.nickname, &role.name, &self.config.reset_password_url);
        outbox.send(NotificationRequest::email(&user.email, welcome.subject, welcome.body));

        Ok((user, role))
    }

    /// Gives an active owner the realtor role, or an active realtor the owner
    /// role
    ///
    /// The new binding is inactive until the user switches to it. A new
    /// realtor binding starts at the document step.
    pub async fn add_alternative_role(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> DomainResult<UserRole> {
        traced(ctx.span("identity.add_alternative_role"), async {
            let mut tx = self.store.begin().await?;
            let result = self.add_alternative_role_in_tx(&mut tx, ctx, user_id).await;
            let created = self.finish(tx, result).await?;
            self.invalidate_permissions(user_id).await;
            info!(user_id, role = %created.role_slug, "Alternative role created");
            Ok(created)
        })
        .await
    }

    async fn add_alternative_role_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
    ) -> DomainResult<UserRole> {
        let account = self
            .store
            .get_account_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        let active = account.active_role.ok_or(DomainError::ActiveRoleMissing)?;
        if active.status != RoleStatus::Active {
            return Err(DomainError::Authorization(
                "active role must be fully onboarded".to_string(),
            ));
        }

        let (target, status) = match active.role_slug {
            RoleSlug::Owner => (RoleSlug::Realtor, RoleStatus::PendingImages),
            RoleSlug::Realtor => (RoleSlug::Owner, RoleStatus::Active),
            other => {
                return Err(DomainError::Authorization(format!(
                    "{} accounts cannot add an alternative role",
                    other
                )))
            }
        };

        if self.store.get_user_role(tx, user_id, target).await?.is_some() {
            return Err(DomainError::conflict(format!("user already has the {} role", target)));
        }
        let role = self
            .store
            .get_role_by_slug(tx, target)
            .await?
            .ok_or_else(|| DomainError::internal(format!("role {} missing from catalog", target)))?;

        let created = self
            .store
            .create_user_role(
                tx,
                NewUserRole {
                    user_id,
                    role_id: role.id,
                    role_slug: target,
                    is_active: false,
                    status,
                    status_reason: None,
                    expires_at: None,
                },
            )
            .await?;

        if target == RoleSlug::Realtor {
            self.storage.create_user_folder(user_id).await?;
        }

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "alternative_role_created",
            None,
            Some(json!({ "user_id": user_id, "role": target.as_str() })),
        )
        .await?;

        Ok(created)
    }

    async fn role_for_signup(&self, tx: &mut S::Tx, slug: RoleSlug) -> DomainResult<Role> {
        let role = self
            .store
            .get_role_by_slug(tx, slug)
            .await?
            .ok_or_else(|| DomainError::validation("role", "unknown role"))?;
        if role.is_system_role {
            return Err(DomainError::Authorization(
                "system roles are created by administrators".to_string(),
            ));
        }
        Ok(role)
    }

    /// Normalizes the identity fields and checks uniqueness among live users
    async fn check_contacts(
        &self,
        tx: &mut S::Tx,
        role: RoleSlug,
        national_id: &str,
        email: &str,
        phone: &str,
    ) -> DomainResult<Contacts> {
        let national_id = if role == RoleSlug::Agency {
            normalize_cnpj(national_id)?
        } else {
            normalize_cpf(national_id)?
        };
        let email = normalize_email(email);
        let phone = normalize_phone(phone)?;

        if self.store.national_id_exists(tx, &national_id).await? {
            return Err(DomainError::conflict("national id already registered"));
        }
        if self.store.email_in_use(tx, &email, None).await? {
            return Err(DomainError::EmailAlreadyInUse);
        }
        if self.store.phone_in_use(tx, &phone, None).await? {
            return Err(DomainError::PhoneAlreadyInUse);
        }

        Ok(Contacts {
            national_id,
            email,
            phone,
        })
    }

    /// Address from the CEP provider plus the user's number and complement
    pub(super) async fn lookup_address(
        &self,
        zip_code: &str,
        number: &str,
        complement: Option<&str>,
    ) -> DomainResult<Address> {
        require("number", number)?;
        let found = self
            .verifier
            .lookup_cep(zip_code)
            .await?
            .ok_or_else(|| DomainError::validation("zip_code", "zip code not found"))?;

        Ok(Address {
            zip_code: found.zip_code,
            street: found.street,
            number: number.trim().to_string(),
            complement: complement.map(str::trim).unwrap_or_default().to_string(),
            neighborhood: found.neighborhood,
            city: found.city,
            state: found.state,
        })
    }
}

/// Admin and root callers only
pub(super) fn require_admin(ctx: &RequestContext) -> DomainResult<i64> {
    match ctx.user() {
        Some(user) if matches!(user.role, RoleSlug::Admin | RoleSlug::Root) => Ok(user.id),
        Some(_) => Err(DomainError::Authorization("administrator role required".to_string())),
        None => Err(DomainError::Authentication("authentication required".to_string())),
    }
}
