//! Role bindings: assign, switch, remove, list

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::signup::require_admin;
use super::{traced, IdentityService};
use crate::audit;
use crate::auth::jwt::TokenPair;
use crate::error::{DomainError, DomainResult};
use crate::models::{AuditTable, NewUserRole, RoleSlug, RoleStatus, UserRole};
use crate::repository::IdentityStore;
use crate::telemetry::RequestContext;

/// Role binding requested by an administrator
#[derive(Debug, Clone, Deserialize)]
pub struct RoleAssignment {
    pub role: RoleSlug,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Makes the new binding the active one
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Defaults to the role's initial status
    #[serde(default)]
    pub status: Option<RoleStatus>,
}

impl RoleAssignment {
    pub fn new(role: RoleSlug) -> Self {
        Self {
            role,
            expires_at: None,
            is_active: None,
            status: None,
        }
    }
}

impl<S: IdentityStore> IdentityService<S> {
    /// Binds a role to a user (admin only)
    pub async fn assign_role_to_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        assignment: RoleAssignment,
    ) -> DomainResult<UserRole> {
        traced(ctx.span("identity.assign_role"), async {
            let admin_id = require_admin(ctx)?;

            let mut tx = self.store.begin().await?;
            let result = self
                .assign_role_in_tx(&mut tx, ctx, admin_id, user_id, &assignment)
                .await;
            let created = self.finish(tx, result).await?;
            self.invalidate_permissions(user_id).await;
            info!(user_id, role = %created.role_slug, admin_id, "Role assigned");
            Ok(created)
        })
        .await
    }

    async fn assign_role_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        admin_id: i64,
        user_id: i64,
        assignment: &RoleAssignment,
    ) -> DomainResult<UserRole> {
        if self.store.get_user_by_id(tx, user_id).await?.is_none() {
            return Err(DomainError::not_found("User"));
        }
        if self
            .store
            .get_user_role(tx, user_id, assignment.role)
            .await?
            .is_some()
        {
            return Err(DomainError::conflict(format!(
                "user already has the {} role",
                assignment.role
            )));
        }
        if let Some(expires_at) = assignment.expires_at {
            if expires_at <= Utc::now() {
                return Err(DomainError::validation("expires_at", "must be in the future"));
            }
        }

        let role = self
            .store
            .get_role_by_slug(tx, assignment.role)
            .await?
            .ok_or_else(|| DomainError::validation("role", "unknown role"))?;

        let is_active = assignment.is_active.unwrap_or(false);
        if is_active {
            self.store.deactivate_user_roles(tx, user_id).await?;
        }

        let created = self
            .store
            .create_user_role(
                tx,
                NewUserRole {
                    user_id,
                    role_id: role.id,
                    role_slug: assignment.role,
                    is_active,
                    status: assignment
                        .status
                        .unwrap_or_else(|| assignment.role.initial_status()),
                    status_reason: None,
                    expires_at: assignment.expires_at,
                },
            )
            .await?;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "role assigned",
            Some(admin_id),
            Some(json!({
                "user_id": user_id,
                "role": assignment.role.as_str(),
                "is_active": is_active,
            })),
        )
        .await?;
        Ok(created)
    }

    /// Makes `slug` the user's only active role and mints tokens for it
    pub async fn switch_active_role(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        slug: RoleSlug,
    ) -> DomainResult<TokenPair> {
        traced(ctx.span("identity.switch_active_role"), async {
            let mut tx = self.store.begin().await?;
            let result = self.switch_active_role_in_tx(&mut tx, ctx, user_id, slug).await;
            let role = self.finish(tx, result).await?;
            self.invalidate_permissions(user_id).await;
            info!(user_id, role = %slug, "Active role switched");
            self.mint(&role)
        })
        .await
    }

    async fn switch_active_role_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        user_id: i64,
        slug: RoleSlug,
    ) -> DomainResult<UserRole> {
        let mut target = self
            .store
            .get_user_role(tx, user_id, slug)
            .await?
            .ok_or_else(|| DomainError::not_found("Role binding"))?;
        if matches!(target.status, RoleStatus::Blocked | RoleStatus::Deleted) {
            return Err(DomainError::Authorization(format!("{} role is not available", slug)));
        }
        if target.is_active {
            return Ok(target);
        }

        let from = self.store.get_active_user_role(tx, user_id).await?;
        self.store.deactivate_user_roles(tx, user_id).await?;
        if !self.store.activate_user_role(tx, target.id).await? {
            return Err(DomainError::not_found("Role binding"));
        }
        target.is_active = true;

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "active role switched",
            Some(user_id),
            Some(json!({
                "user_id": user_id,
                "from": from.map(|r| r.role_slug.as_str()),
                "to": slug.as_str(),
            })),
        )
        .await?;
        Ok(target)
    }

    /// Deletes a binding (admin only); the active binding cannot be removed
    pub async fn remove_role_from_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        slug: RoleSlug,
    ) -> DomainResult<()> {
        traced(ctx.span("identity.remove_role"), async {
            let admin_id = require_admin(ctx)?;

            let mut tx = self.store.begin().await?;
            let result = self
                .remove_role_in_tx(&mut tx, ctx, admin_id, user_id, slug)
                .await;
            self.finish(tx, result).await?;
            self.invalidate_permissions(user_id).await;
            info!(user_id, role = %slug, admin_id, "Role removed");
            Ok(())
        })
        .await
    }

    async fn remove_role_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        admin_id: i64,
        user_id: i64,
        slug: RoleSlug,
    ) -> DomainResult<()> {
        let binding = self
            .store
            .get_user_role(tx, user_id, slug)
            .await?
            .ok_or_else(|| DomainError::not_found("Role binding"))?;
        if binding.is_active {
            return Err(DomainError::conflict("cannot remove the active role"));
        }

        self.store.delete_user_role(tx, binding.id).await?;
        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::UserRoles,
            "role removed",
            Some(admin_id),
            Some(json!({ "user_id": user_id, "role": slug.as_str() })),
        )
        .await?;
        Ok(())
    }

    /// Every binding of the user, active one included
    pub async fn list_user_roles(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> DomainResult<Vec<UserRole>> {
        traced(ctx.span("identity.list_user_roles"), async {
            let mut tx = self.store.begin_read_only().await?;
            let result = self.store.list_user_roles(&mut tx, user_id).await;
            self.rollback(tx).await;
            Ok(result?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::ErrorKind;
    use crate::repository::{TransactionPort, UserRepository};

    async fn active_count(h: &Harness, user_id: i64) -> i64 {
        let store = h.store.as_ref();
        let mut tx = store.begin_read_only().await.unwrap();
        let count = store.count_active_roles(&mut tx, user_id).await.unwrap();
        store.rollback(tx).await.unwrap();
        count
    }

    #[tokio::test]
    async fn test_assign_then_switch_keeps_single_active_role() {
        let h = harness();
        let user_id = signed_up(&h, RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777").await;
        let admin = admin_ctx();

        let binding = h
            .service
            .assign_role_to_user(&admin, user_id, RoleAssignment::new(RoleSlug::Photographer))
            .await
            .unwrap();
        assert!(!binding.is_active);
        assert_eq!(binding.status, RoleStatus::Active);
        assert_eq!(active_count(&h, user_id).await, 1);

        let tokens = h
            .service
            .switch_active_role(&RequestContext::generate(), user_id, RoleSlug::Photographer)
            .await
            .unwrap();
        let claims = h.service.tokens().validate_access(&tokens.access_token).unwrap();
        assert_eq!(claims.user_info.role, RoleSlug::Photographer);
        assert_eq!(active_count(&h, user_id).await, 1);
        assert!(h.permissions.invalidated().iter().filter(|&&id| id == user_id).count() >= 2);

        let roles = h
            .service
            .list_user_roles(&RequestContext::generate(), user_id)
            .await
            .unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles.iter().filter(|r| r.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_assign_duplicate_role_conflicts() {
        let h = harness();
        let user_id = signed_up(&h, RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777").await;
        let err = h
            .service
            .assign_role_to_user(&admin_ctx(), user_id, RoleAssignment::new(RoleSlug::Owner))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_assign_requires_admin() {
        let h = harness();
        let user_id = signed_up(&h, RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777").await;
        let err = h
            .service
            .assign_role_to_user(
                &RequestContext::generate(),
                user_id,
                RoleAssignment::new(RoleSlug::Admin),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_switch_to_missing_role_is_not_found() {
        let h = harness();
        let user_id = signed_up(&h, RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777").await;
        let err = h
            .service
            .switch_active_role(&RequestContext::generate(), user_id, RoleSlug::Agency)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(active_count(&h, user_id).await, 1);
    }

    #[tokio::test]
    async fn test_remove_role() {
        let h = harness();
        let user_id = signed_up(&h, RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777").await;
        let admin = admin_ctx();

        let err = h
            .service
            .remove_role_from_user(&admin, user_id, RoleSlug::Owner)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        h.service
            .assign_role_to_user(&admin, user_id, RoleAssignment::new(RoleSlug::Admin))
            .await
            .unwrap();
        h.service
            .remove_role_from_user(&admin, user_id, RoleSlug::Admin)
            .await
            .unwrap();
        assert_eq!(h.store.user_roles(user_id).len(), 1);
    }
}
