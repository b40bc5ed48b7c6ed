//! Profile reads and edits, onboarding status and user-media URLs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::validate::require;
use super::{traced, IdentityService};
use crate::audit;
use crate::error::{DomainError, DomainResult};
use crate::models::{Address, AuditTable, RoleSlug, RoleStatus};
use crate::repository::IdentityStore;
use crate::storage::{DocumentKind, PhotoKind, PresignedRequest};
use crate::telemetry::RequestContext;

/// Public view of an account
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub national_id: String,
    pub full_name: String,
    pub nickname: String,
    pub email: String,
    pub phone: String,
    pub birth_date: Option<NaiveDate>,
    pub address: Address,
    pub opt_in: bool,
    pub role: RoleSlug,
    pub status: RoleStatus,
    /// Every role the user holds, active one included
    pub roles: Vec<RoleSlug>,
    pub last_activity_at: DateTime<Utc>,
}

/// Editable profile fields; absent fields are kept
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub nickname: Option<String>,
    /// Triggers a CEP lookup together with `number`
    pub zip_code: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
}

/// Where the active role stands in onboarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingStatus {
    pub role: RoleSlug,
    pub status: RoleStatus,
    pub description: &'static str,
    pub reason: Option<String>,
    pub email_pending: bool,
    pub phone_pending: bool,
}

fn describe(status: RoleStatus) -> &'static str {
    match status {
        RoleStatus::Active => "Onboarding finished. User is active.",
        RoleStatus::Blocked => "User is blocked.",
        RoleStatus::TempBlocked => "User is temporarily blocked.",
        RoleStatus::PendingProfile => "Waiting for the user to confirm phone and/or email.",
        RoleStatus::PendingImages => "Waiting for the user to upload CRECI documents and selfie.",
        RoleStatus::PendingOcr | RoleStatus::PendingFace | RoleStatus::PendingManual => {
            "Waiting for manual verification."
        }
        RoleStatus::RefusedImage => "CRECI images were refused.",
        RoleStatus::RefusedDocument => "CRECI document was refused.",
        RoleStatus::RefusedData => "CRECI data was refused.",
        RoleStatus::InvitePending => "User is invited to join an agency team.",
        RoleStatus::Deleted => "Account deleted.",
    }
}

impl<S: IdentityStore> IdentityService<S> {
    pub async fn get_profile(&self, ctx: &RequestContext, user_id: i64) -> DomainResult<UserProfile> {
        traced(ctx.span("identity.get_profile"), async {
            let mut tx = self.store.begin_read_only().await?;
            let result = self.get_profile_in_tx(&mut tx, user_id).await;
            self.rollback(tx).await;
            result
        })
        .await
    }

    async fn get_profile_in_tx(&self, tx: &mut S::Tx, user_id: i64) -> DomainResult<UserProfile> {
        let account = self
            .store
            .get_account_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        let active = account.active_role.ok_or(DomainError::ActiveRoleMissing)?;
        let roles = self
            .store
            .list_user_roles(tx, user_id)
            .await?
            .into_iter()
            .map(|r| r.role_slug)
            .collect();
        let user = account.user;

        Ok(UserProfile {
            id: user.id,
            national_id: user.national_id,
            full_name: user.full_name,
            nickname: user.nickname,
            email: user.email,
            phone: user.phone,
            birth_date: user.birth_date,
            address: user.address,
            opt_in: user.opt_in,
            role: active.role_slug,
            status: active.status,
            roles,
            last_activity_at: user.last_activity_at,
        })
    }

    /// Updates nickname and address; a new zip code re-runs the CEP lookup
    pub async fn update_profile(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        update: ProfileUpdate,
    ) -> DomainResult<UserProfile> {
        traced(ctx.span("identity.update_profile"), async {
            if let Some(nickname) = &update.nickname {
                require("nickname", nickname)?;
            }

            let mut tx = self.store.begin().await?;
            let result = self.update_profile_in_tx(&mut tx, ctx, user_id, &update).await;
            self.finish(tx, result).await?;
            info!(user_id, "Profile updated");
            self.get_profile(ctx, user_id).await
        })
        .await
    }

    async fn update_profile_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> DomainResult<()> {
        let mut user = self
            .store
            .get_user_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;

        let mut changed = Vec::new();
        if let Some(nickname) = &update.nickname {
            user.nickname = nickname.trim().to_string();
            changed.push("nickname");
        }
        match (&update.zip_code, &update.number) {
            (Some(zip), number) => {
                let number = number.as_deref().unwrap_or(&user.address.number).to_string();
                let complement = update
                    .complement
                    .clone()
                    .unwrap_or_else(|| user.address.complement.clone());
                user.address = self.lookup_address(zip, &number, Some(complement.as_str())).await?;
                changed.push("address");
            }
            (None, number) => {
                if let Some(number) = number {
                    require("number", number)?;
                    user.address.number = number.trim().to_string();
                    changed.push("number");
                }
                if let Some(complement) = &update.complement {
                    user.address.complement = complement.trim().to_string();
                    changed.push("complement");
                }
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        self.store.update_user(tx, &user).await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            "profile updated",
            Some(user_id),
            Some(json!({ "fields": changed })),
        )
        .await
    }

    /// Turns push notifications on or off for every device of the user
    pub async fn update_push_opt_in(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        opt_in: bool,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.update_push_opt_in"), async {
            let mut tx = self.store.begin().await?;
            let result = self.update_push_opt_in_in_tx(&mut tx, ctx, user_id, opt_in).await;
            self.finish(tx, result).await?;
            info!(user_id, opt_in, "Push opt-in updated");
            Ok(())
        })
        .await
    }

    async fn update_push_opt_in_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
        opt_in: bool,
    ) -> DomainResult<()> {
        let mut user = self
            .store
            .get_user_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        if user.opt_in == opt_in {
            return Ok(());
        }
        user.opt_in = opt_in;
        self.store.update_user(tx, &user).await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            "push opt-in updated",
            Some(user_id),
            Some(json!({ "opt_in": opt_in })),
        )
        .await
    }

    pub async fn get_onboarding_status(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> DomainResult<OnboardingStatus> {
        traced(ctx.span("identity.get_onboarding_status"), async {
            // Validation reads take a row lock, which read-only transactions refuse
            let mut tx = self.store.begin().await?;
            let result = self.onboarding_status_in_tx(&mut tx, user_id).await;
            self.rollback(tx).await;
            result
        })
        .await
    }

    async fn onboarding_status_in_tx(
        &self,
        tx: &mut S::Tx,
        user_id: i64,
    ) -> DomainResult<OnboardingStatus> {
        let account = self
            .store
            .get_account_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        let role = account.active_role.ok_or(DomainError::ActiveRoleMissing)?;
        let validation = self.store.lock_validation(tx, user_id).await?;

        Ok(OnboardingStatus {
            role: role.role_slug,
            status: role.status,
            description: describe(role.status),
            reason: role.status_reason,
            email_pending: validation.as_ref().map(|v| v.email_pending()).unwrap_or(false),
            phone_pending: validation.as_ref().map(|v| v.phone_pending()).unwrap_or(false),
        })
    }

    pub async fn photo_upload_url(
        &self,
        user_id: i64,
        content_type: Option<&str>,
    ) -> DomainResult<PresignedRequest> {
        Ok(self
            .storage
            .photo_upload_url(user_id, PhotoKind::Profile, content_type)
            .await?)
    }

    /// Download URLs for the profile photo and its three thumbnails
    pub async fn photo_download_urls(
        &self,
        user_id: i64,
    ) -> DomainResult<Vec<(PhotoKind, PresignedRequest)>> {
        let mut urls = Vec::with_capacity(4);
        for kind in [
            PhotoKind::Profile,
            PhotoKind::ThumbnailSmall,
            PhotoKind::ThumbnailMedium,
            PhotoKind::ThumbnailLarge,
        ] {
            urls.push((kind, self.storage.photo_download_url(user_id, kind).await?));
        }
        Ok(urls)
    }

    pub async fn document_upload_url(
        &self,
        user_id: i64,
        kind: DocumentKind,
        content_type: Option<&str>,
    ) -> DomainResult<PresignedRequest> {
        Ok(self.storage.document_upload_url(user_id, kind, content_type).await?)
    }

    pub async fn document_download_url(
        &self,
        user_id: i64,
        kind: DocumentKind,
    ) -> DomainResult<PresignedRequest> {
        Ok(self.storage.document_download_url(user_id, kind).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::PresignMethod;

    async fn owner(h: &Harness) -> i64 {
        signed_up(h, RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777").await
    }

    #[tokio::test]
    async fn test_profile_reflects_signup() {
        let h = harness();
        let user_id = owner(&h).await;

        let profile = h.service.get_profile(&RequestContext::generate(), user_id).await.unwrap();
        assert_eq!(profile.full_name, "Maria da Silva");
        assert_eq!(profile.address.street, "Avenida Paulista");
        assert_eq!(profile.role, RoleSlug::Owner);
        assert_eq!(profile.roles, vec![RoleSlug::Owner]);

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_update_profile_keeps_number_on_new_zip() {
        let h = harness();
        let user_id = owner(&h).await;

        let profile = h
            .service
            .update_profile(
                &RequestContext::generate(),
                user_id,
                ProfileUpdate {
                    nickname: Some("  Mari ".to_string()),
                    zip_code: Some("01310100".to_string()),
                    number: None,
                    complement: Some("apto 12".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(profile.nickname, "Mari");
        assert_eq!(profile.address.number, "900");
        assert_eq!(profile.address.complement, "apto 12");

        let err = h
            .service
            .update_profile(
                &RequestContext::generate(),
                user_id,
                ProfileUpdate {
                    zip_code: Some("99999999".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_opt_out_hides_device_tokens() {
        let h = harness();
        let user_id = owner(&h).await;
        let ctx = RequestContext::generate();

        h.service.update_push_opt_in(&ctx, user_id, false).await.unwrap();
        assert!(!h.store.user(user_id).unwrap().opt_in);
        let tokens = crate::repository::DeviceTokenRegistry::list_tokens_by_user_if_opted_in(
            h.store.as_ref(),
            user_id,
        )
        .await
        .unwrap();
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn test_onboarding_status_after_signup() {
        let h = harness();
        let user_id = owner(&h).await;

        let status = h
            .service
            .get_onboarding_status(&RequestContext::generate(), user_id)
            .await
            .unwrap();
        assert_eq!(status.status, RoleStatus::PendingProfile);
        assert!(status.email_pending);
        assert!(status.phone_pending);
        assert_eq!(status.description, describe(RoleStatus::PendingProfile));
    }

    #[tokio::test]
    async fn test_media_urls() {
        let h = harness();
        let upload = h.service.photo_upload_url(42, Some("image/jpeg")).await.unwrap();
        assert_eq!(upload.method, PresignMethod::Put);
        assert_eq!(upload.object_key, "42/photo.jpg");

        let downloads = h.service.photo_download_urls(42).await.unwrap();
        assert_eq!(downloads.len(), 4);
        assert_eq!(downloads[1].1.object_key, "42/thumbnails/small.jpg");

        let doc = h
            .service
            .document_upload_url(42, DocumentKind::Selfie, Some("image/jpeg"))
            .await
            .unwrap();
        assert_eq!(doc.object_key, "42/selfie.jpg");
    }
}
