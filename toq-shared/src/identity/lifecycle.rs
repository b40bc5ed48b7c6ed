//! Account teardown, administrative blocks and manual CRECI review

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::signup::require_admin;
use super::{traced, IdentityService, Outbox};
use crate::audit;
use crate::auth::jwt::TokenPair;
use crate::error::{DomainError, DomainResult};
use crate::events::SessionEvent;
use crate::models::{AuditTable, RoleSlug, RoleStatus, UserRole};
use crate::notification::templates;
use crate::policy::ActionFinished;
use crate::repository::{CleanupReport, IdentityStore};
use crate::telemetry::RequestContext;

/// Outcome of an account deletion
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    pub user_id: i64,
    pub role: RoleSlug,
    pub listings: u64,
    pub offers: u64,
    pub visits: u64,
    /// Realtors unlinked from a deleted agency
    pub unlinked_realtors: usize,
    pub sessions_deleted: u64,
    pub device_tokens_removed: u64,
    pub objects_deleted: usize,
    /// Already expired; clients drop their stored pair with it
    pub tokens: TokenPair,
}

/// Rows removed inside the deletion transaction
struct Teardown {
    role: UserRole,
    cleanup: CleanupReport,
    unlinked_realtors: usize,
    sessions_deleted: u64,
}

impl<S: IdentityStore> IdentityService<S> {
    /// Deletes the caller's own account
    pub async fn delete_account(&self, ctx: &RequestContext, user_id: i64) -> DomainResult<DeletionReport> {
        traced(ctx.span("identity.delete_account"), async {
            self.delete_user(ctx, user_id, false).await
        })
        .await
    }

    /// Deletes a root/admin/photographer account (admin only)
    pub async fn delete_system_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> DomainResult<DeletionReport> {
        traced(ctx.span("identity.delete_system_user"), async {
            let admin_id = require_admin(ctx)?;
            if admin_id == user_id {
                return Err(DomainError::Authorization(
                    "administrators cannot delete themselves".to_string(),
                ));
            }
            self.delete_user(ctx, user_id, true).await
        })
        .await
    }

    async fn delete_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        system_only: bool,
    ) -> DomainResult<DeletionReport> {
        if user_id == self.config.template_user_id {
            return Err(DomainError::Authorization(
                "the template account cannot be deleted".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let mut outbox = Outbox::default();
        let result = self
            .delete_user_in_tx(&mut tx, ctx, user_id, system_only, &mut outbox)
            .await;
        let teardown = self.finish(tx, result).await?;
        self.flush(ctx, outbox).await;

        let device_tokens_removed = match self.device_tokens.remove_all_by_user(user_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to purge device tokens of deleted user");
                0
            }
        };
        let objects_deleted = match self.storage.delete_user_folder(user_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to delete media folder of deleted user");
                0
            }
        };
        self.events.publish(ctx, SessionEvent::revoked(user_id, None));
        self.invalidate_permissions(user_id).await;

        let tokens = self.tokens.mint_expired_pair(&Self::infos(&teardown.role))?;
        info!(
            security = true,
            user_id,
            role = %teardown.role.role_slug,
            objects_deleted,
            "Account deleted"
        );

        Ok(DeletionReport {
            user_id,
            role: teardown.role.role_slug,
            listings: teardown.cleanup.listings,
            offers: teardown.cleanup.offers,
            visits: teardown.cleanup.visits,
            unlinked_realtors: teardown.unlinked_realtors,
            sessions_deleted: teardown.sessions_deleted,
            device_tokens_removed,
            objects_deleted,
            tokens,
        })
    }

    async fn delete_user_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
        system_only: bool,
        outbox: &mut Outbox,
    ) -> DomainResult<Teardown> {
        let account = self
            .store
            .get_account_by_id(tx, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        let role = account.active_role.ok_or(DomainError::ActiveRoleMissing)?;
        let mut user = account.user;

        if system_only && !role.role_slug.is_system() {
            return Err(DomainError::Authorization(format!(
                "{} accounts are not system users",
                role.role_slug
            )));
        }

        let mut cleanup = CleanupReport::default();
        let mut unlinked_realtors = 0;
        match role.role_slug {
            RoleSlug::Owner => {
                cleanup = self.listings.cleanup_owner(user_id).await?;
            }
            RoleSlug::Realtor => {
                cleanup = self.listings.cleanup_realtor(user_id).await?;
                if let Some(link) = self.store.get_agency_link_by_realtor(tx, user_id).await? {
                    self.store.delete_agency_link_by_realtor(tx, user_id).await?;
                    outbox.push_to_user(link.agency_id, templates::realtor_unlinked_push(&user.nickname));
                }
            }
            RoleSlug::Agency => {
                let realtors = self.store.list_realtor_ids_by_agency(tx, user_id).await?;
                self.store.delete_agency_links_by_agency(tx, user_id).await?;
                self.store.delete_invites_by_agency(tx, user_id).await?;
                for realtor_id in &realtors {
                    outbox.push_to_user(*realtor_id, templates::agency_unlinked_push(&user.nickname));
                }
                unlinked_realtors = realtors.len();
            }
            RoleSlug::Root | RoleSlug::Photographer | RoleSlug::Admin => {}
        }

        // An owner may also hold an inactive realtor binding
        if role.role_slug != RoleSlug::Realtor
            && self.store.get_agency_link_by_realtor(tx, user_id).await?.is_some()
        {
            self.store.delete_agency_link_by_realtor(tx, user_id).await?;
        }
        if let Some(invite) = self.store.get_invite_by_phone(tx, &user.phone).await? {
            self.store.delete_invite(tx, invite.id).await?;
        }

        user.mask_for_deletion();
        self.store.update_user(tx, &user).await?;
        let roles_deleted = self.store.delete_user_roles(tx, user_id).await?;
        let sessions_deleted = self.store.delete_sessions_by_user(tx, user_id).await?;
        self.store.delete_validation(tx, user_id).await?;
        self.store.delete_wrong_signin(tx, user_id).await?;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            "account deleted",
            None,
            Some(json!({ "user_id": user_id, "role": role.role_slug.as_str() })),
        )
        .await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "roles deleted",
            None,
            Some(json!({ "user_id": user_id, "count": roles_deleted })),
        )
        .await?;

        Ok(Teardown {
            role,
            cleanup,
            unlinked_realtors,
            sessions_deleted,
        })
    }

    /// Blocks an account permanently and revokes its sessions (admin only)
    pub async fn block_user(&self, ctx: &RequestContext, user_id: i64, reason: &str) -> DomainResult<()> {
        traced(ctx.span("identity.block_user"), async {
            let admin_id = require_admin(ctx)?;
            if user_id == admin_id {
                return Err(DomainError::Authorization(
                    "administrators cannot block themselves".to_string(),
                ));
            }

            let mut tx = self.store.begin().await?;
            let result = self.block_user_in_tx(&mut tx, ctx, admin_id, user_id, reason).await;
            self.finish(tx, result).await?;

            self.events.publish(ctx, SessionEvent::revoked(user_id, None));
            self.invalidate_permissions(user_id).await;
            warn!(security = true, user_id, admin_id, "User blocked");
            Ok(())
        })
        .await
    }

    async fn block_user_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        admin_id: i64,
        user_id: i64,
        reason: &str,
    ) -> DomainResult<()> {
        if self.store.get_user_by_id(tx, user_id).await?.is_none() {
            return Err(DomainError::not_found("User"));
        }
        self.store.set_permanently_blocked(tx, user_id, true).await?;
        let revoked = self.store.revoke_sessions_by_user(tx, user_id).await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            "user blocked",
            Some(admin_id),
            Some(json!({ "user_id": user_id, "reason": reason, "sessions_revoked": revoked })),
        )
        .await
    }

    /// Clears permanent and temporal blocks and the failed-attempt counter
    /// (admin only)
    pub async fn unblock_user(&self, ctx: &RequestContext, user_id: i64) -> DomainResult<()> {
        traced(ctx.span("identity.unblock_user"), async {
            let admin_id = require_admin(ctx)?;

            let mut tx = self.store.begin().await?;
            let result = self.unblock_user_in_tx(&mut tx, ctx, admin_id, user_id).await;
            self.finish(tx, result).await?;

            self.invalidate_permissions(user_id).await;
            info!(security = true, user_id, admin_id, "User unblocked");
            Ok(())
        })
        .await
    }

    async fn unblock_user_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        admin_id: i64,
        user_id: i64,
    ) -> DomainResult<()> {
        if user_id == self.config.template_user_id {
            return Err(DomainError::Authorization(
                "the template account stays blocked".to_string(),
            ));
        }
        if self.store.get_user_by_id(tx, user_id).await?.is_none() {
            return Err(DomainError::not_found("User"));
        }

        self.store.set_permanently_blocked(tx, user_id, false).await?;
        self.lift_blocks(tx, user_id).await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::Users,
            "user unblocked",
            Some(admin_id),
            Some(json!({ "user_id": user_id })),
        )
        .await
    }

    /// Lifts every temporal block of the user; returns the bindings touched
    async fn lift_blocks(&self, tx: &mut S::Tx, user_id: i64) -> DomainResult<usize> {
        self.store.set_user_blocked_until(tx, user_id, None).await?;
        self.store.delete_wrong_signin(tx, user_id).await?;

        let mut lifted = 0;
        for mut role in self.store.list_user_roles(tx, user_id).await? {
            if role.lift_temp_block() {
                self.store.update_user_role(tx, &role).await?;
                lifted += 1;
            }
        }
        Ok(lifted)
    }

    /// Lifts temporal blocks whose deadline passed; returns the users released
    ///
    /// Run by the temp-block reconciler, one batch per call.
    pub async fn clear_expired_temp_blocks(&self, ctx: &RequestContext, limit: i64) -> DomainResult<usize> {
        traced(ctx.span("identity.clear_expired_temp_blocks"), async {
            let mut tx = self.store.begin().await?;
            let result = self.clear_expired_temp_blocks_in_tx(&mut tx, ctx, limit).await;
            let released = self.finish(tx, result).await?;

            for user_id in &released {
                self.invalidate_permissions(*user_id).await;
                info!(security = true, user_id = *user_id, "Temporary block expired");
            }
            Ok(released.len())
        })
        .await
    }

    async fn clear_expired_temp_blocks_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        limit: i64,
    ) -> DomainResult<Vec<i64>> {
        let user_ids = self
            .store
            .list_users_with_expired_block(tx, Utc::now(), limit)
            .await?;
        for user_id in &user_ids {
            let lifted = self.lift_blocks(tx, *user_id).await?;
            audit::record(
                self.store.as_ref(),
                tx,
                ctx,
                AuditTable::UserRoles,
                "temporary block expired",
                None,
                Some(json!({ "user_id": user_id, "roles": lifted })),
            )
            .await?;
        }
        Ok(user_ids)
    }

    /// Records the manual CRECI review outcome for a realtor (admin only)
    ///
    /// Every opted-in device of the realtor gets a push describing the
    /// outcome.
    pub async fn approve_creci_manual(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        target: RoleStatus,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.approve_creci_manual"), async {
            let admin_id = require_admin(ctx)?;
            if !target.is_manual_review_outcome() {
                return Err(DomainError::validation(
                    "status",
                    "must be active, refused_image, refused_document or refused_data",
                ));
            }

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .approve_creci_manual_in_tx(&mut tx, ctx, admin_id, user_id, target, &mut outbox)
                .await;
            self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            self.invalidate_permissions(user_id).await;
            info!(user_id, admin_id, status = %target, "Manual CRECI review recorded");
            Ok(())
        })
        .await
    }

    async fn approve_creci_manual_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        admin_id: i64,
        user_id: i64,
        target: RoleStatus,
        outbox: &mut Outbox,
    ) -> DomainResult<()> {
        let mut role = self
            .store
            .get_user_role(tx, user_id, RoleSlug::Realtor)
            .await?
            .ok_or_else(|| DomainError::not_found("Realtor"))?;
        if role.status != RoleStatus::PendingManual {
            return Err(DomainError::conflict("realtor is not awaiting manual review"));
        }

        let from = role.status;
        role.status = target;
        self.store.update_user_role(tx, &role).await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "manual creci review",
            Some(admin_id),
            Some(json!({
                "user_id": user_id,
                "status_from": from.as_i16(),
                "status_to": target.as_i16(),
                "reason": "manual_review",
            })),
        )
        .await?;

        outbox.push_to_user(user_id, templates::manual_review_push(target));
        Ok(())
    }

    /// Moves the realtor forward once the three CRECI documents are uploaded
    pub async fn confirm_creci_documents(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> DomainResult<RoleStatus> {
        traced(ctx.span("identity.confirm_creci_documents"), async {
            if !self.storage.documents_present(user_id).await? {
                return Err(DomainError::validation(
                    "documents",
                    "selfie, front and back must be uploaded",
                ));
            }

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .confirm_creci_documents_in_tx(&mut tx, ctx, user_id, &mut outbox)
                .await;
            let status = self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            info!(user_id, status = %status, "CRECI documents confirmed");
            Ok(status)
        })
        .await
    }

    async fn confirm_creci_documents_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
        outbox: &mut Outbox,
    ) -> DomainResult<RoleStatus> {
        let mut role = self
            .store
            .get_user_role(tx, user_id, RoleSlug::Realtor)
            .await?
            .ok_or_else(|| DomainError::not_found("Realtor"))?;
        self.ensure_rule(
            &role,
            ActionFinished::CreciImagesUploaded,
            "documents are not expected in current status",
        )?;
        self.apply_transition(tx, ctx, &mut role, ActionFinished::CreciImagesUploaded, outbox)
            .await?;
        Ok(role.status)
    }
}
