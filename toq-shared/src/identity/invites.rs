//! Agency to realtor invitations

use serde_json::json;
use tracing::info;

use super::validate::normalize_phone;
use super::{traced, IdentityService, Outbox};
use crate::audit;
use crate::error::{DomainError, DomainResult};
use crate::models::{AuditTable, RoleSlug, User, UserRole};
use crate::notification::templates;
use crate::notification::NotificationRequest;
use crate::policy::ActionFinished;
use crate::repository::IdentityStore;
use crate::telemetry::RequestContext;

/// Caller's id when its active role is `slug`
fn require_role(ctx: &RequestContext, slug: RoleSlug) -> DomainResult<i64> {
    match ctx.user() {
        Some(user) if user.role == slug => Ok(user.id),
        Some(_) => Err(DomainError::Authorization(format!("{} role required", slug))),
        None => Err(DomainError::Authentication("authentication required".to_string())),
    }
}

/// Invite response chosen by the realtor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Accept,
    Reject,
}

impl<S: IdentityStore> IdentityService<S> {
    /// Invites the holder of `phone` to work with the calling agency
    ///
    /// Realtors already on the platform get a push; unknown phones get an
    /// SMS. Inviting a phone again moves the invite to the caller.
    pub async fn invite_realtor(&self, ctx: &RequestContext, phone: &str) -> DomainResult<()> {
        traced(ctx.span("identity.invite_realtor"), async {
            let agency_id = require_role(ctx, RoleSlug::Agency)?;
            let phone = normalize_phone(phone)?;

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .invite_realtor_in_tx(&mut tx, ctx, agency_id, &phone, &mut outbox)
                .await;
            self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            info!(agency_id, "Realtor invited");
            Ok(())
        })
        .await
    }

    async fn invite_realtor_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        agency_id: i64,
        phone: &str,
        outbox: &mut Outbox,
    ) -> DomainResult<()> {
        let agency = self
            .store
            .get_user_by_id(tx, agency_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Agency"))?;

        let realtor = self.realtor_by_phone(tx, phone).await?;
        let existing = self.store.get_invite_by_phone(tx, phone).await?;

        let (invite_id, action) = match existing {
            Some(invite) => {
                self.store.update_invite_agency(tx, invite.id, agency_id).await?;
                (invite.id, "invite_updated")
            }
            None => (self.store.create_invite(tx, agency_id, phone).await?.id, "invite_created"),
        };

        match &realtor {
            Some((user, _)) => {
                outbox.push_to_user(user.id, templates::invite_push(&agency.nickname));
            }
            None => {
                outbox.send(NotificationRequest::sms(phone, templates::invite_sms(&agency.nickname)));
            }
        }

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::AgencyInvites,
            action,
            Some(agency_id),
            Some(json!({
                "invite_id": invite_id,
                "agency_id": agency_id,
                "phone": phone,
                "realtor_id": realtor.as_ref().map(|(user, _)| user.id),
            })),
        )
        .await?;

        if let Some((_, mut role)) = realtor {
            self.apply_transition(tx, ctx, &mut role, ActionFinished::InviteCreated, outbox)
                .await?;
        }
        Ok(())
    }

    /// Realtor registered under `phone`, rejecting one already linked
    async fn realtor_by_phone(
        &self,
        tx: &mut S::Tx,
        phone: &str,
    ) -> DomainResult<Option<(User, UserRole)>> {
        let Some(user) = self.store.get_user_by_phone(tx, phone).await? else {
            return Ok(None);
        };
        let role = self
            .store
            .get_user_role(tx, user.id, RoleSlug::Realtor)
            .await?
            .ok_or_else(|| DomainError::validation("phone", "phone does not belong to a realtor"))?;
        if self.store.get_agency_link_by_realtor(tx, user.id).await?.is_some() {
            return Err(DomainError::conflict("Realtor already linked to an agency"));
        }
        self.ensure_rule(
            &role,
            ActionFinished::InviteCreated,
            "realtor cannot receive invitations in current status",
        )?;
        Ok(Some((user, role)))
    }

    /// Accepts the pending invite and links the realtor to the agency
    pub async fn accept_invitation(&self, ctx: &RequestContext) -> DomainResult<()> {
        self.answer_invitation(ctx, Answer::Accept).await
    }

    /// Declines the pending invite
    pub async fn reject_invitation(&self, ctx: &RequestContext) -> DomainResult<()> {
        self.answer_invitation(ctx, Answer::Reject).await
    }

    async fn answer_invitation(&self, ctx: &RequestContext, answer: Answer) -> DomainResult<()> {
        let span = match answer {
            Answer::Accept => ctx.span("identity.accept_invitation"),
            Answer::Reject => ctx.span("identity.reject_invitation"),
        };
        traced(span, async {
            let realtor_id = require_role(ctx, RoleSlug::Realtor)?;

            let mut tx = self.store.begin().await?;
            let mut outbox = Outbox::default();
            let result = self
                .answer_invitation_in_tx(&mut tx, ctx, realtor_id, answer, &mut outbox)
                .await;
            let agency_id = self.finish(tx, result).await?;
            self.flush(ctx, outbox).await;
            info!(realtor_id, agency_id, ?answer, "Invitation answered");
            Ok(())
        })
        .await
    }

    async fn answer_invitation_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &RequestContext,
        realtor_id: i64,
        answer: Answer,
        outbox: &mut Outbox,
    ) -> DomainResult<i64> {
        let account = self
            .store
            .get_account_by_id(tx, realtor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User"))?;
        let mut role = account.active_role.ok_or(DomainError::ActiveRoleMissing)?;
        let realtor = account.user;

        let invite = self
            .store
            .get_invite_by_phone(tx, &realtor.phone)
            .await?
            .ok_or_else(|| DomainError::not_found("Invitation"))?;

        if answer == Answer::Accept {
            if self.store.get_agency_link_by_realtor(tx, realtor.id).await?.is_some() {
                return Err(DomainError::conflict("Realtor already linked to an agency"));
            }
            self.store.create_agency_link(tx, invite.agency_id, realtor.id).await?;
        }
        self.store.delete_invite(tx, invite.id).await?;

        let (action, message, label) = match answer {
            Answer::Accept => (
                ActionFinished::InviteAccepted,
                templates::invite_accepted_push(&realtor.nickname),
                "invite_accepted",
            ),
            Answer::Reject => (
                ActionFinished::InviteRejected,
                templates::invite_rejected_push(&realtor.nickname),
                "invite_rejected",
            ),
        };
        self.apply_transition(tx, ctx, &mut role, action, outbox).await?;
        outbox.push_to_user(invite.agency_id, message);

        audit::record(
            self.store.as_ref(),
            tx,
            ctx,
            AuditTable::AgencyInvites,
            label,
            Some(realtor.id),
            Some(json!({ "invite_id": invite.id, "agency_id": invite.agency_id })),
        )
        .await?;
        if answer == Answer::Accept {
            audit::record(
                self.store.as_ref(),
                tx,
                ctx,
                AuditTable::RealtorAgency,
                "realtor linked",
                Some(realtor.id),
                Some(json!({ "agency_id": invite.agency_id, "realtor_id": realtor.id })),
            )
            .await?;
        }
        Ok(invite.agency_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::auth::jwt::UserInfos;
    use crate::error::ErrorKind;
    use crate::models::RoleStatus;
    use crate::notification::Channel;
    use crate::repository::{TransactionPort, UserRepository};

    const REALTOR_PHONE: &str = "+5511977776666";

    fn ctx_for(id: i64, role: RoleSlug) -> RequestContext {
        RequestContext::generate().with_user(UserInfos {
            id,
            role,
            profile_status: RoleStatus::Active,
        })
    }

    async fn set_status(h: &Harness, user_id: i64, status: RoleStatus) {
        let store = h.store.as_ref();
        let mut tx = store.begin().await.unwrap();
        let mut role = store.get_active_user_role(&mut tx, user_id).await.unwrap().unwrap();
        role.status = status;
        store.update_user_role(&mut tx, &role).await.unwrap();
        store.commit(tx).await.unwrap();
    }

    async fn agency(h: &Harness) -> i64 {
        signed_up(h, RoleSlug::Agency, AGENCY_CNPJ, "contato@central.com", "1133334444").await
    }

    async fn active_realtor(h: &Harness) -> i64 {
        let id = signed_up(h, RoleSlug::Realtor, REALTOR_CPF, "joao@b.com", REALTOR_PHONE).await;
        set_status(h, id, RoleStatus::Active).await;
        id
    }

    #[tokio::test]
    async fn test_invite_unknown_phone_sends_sms() {
        let h = harness();
        let agency_id = agency(&h).await;

        h.service
            .invite_realtor(&ctx_for(agency_id, RoleSlug::Agency), "(21) 98765-4321")
            .await
            .unwrap();
        settle().await;

        let invites = h.store.invites();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].phone, "+5521987654321");
        let sms = h
            .gateway
            .sent()
            .into_iter()
            .filter(|r| r.channel == Channel::Sms && r.to.as_deref() == Some("+5521987654321"))
            .count();
        assert_eq!(sms, 1);
    }

    #[tokio::test]
    async fn test_invite_and_accept_links_realtor() {
        let h = harness();
        let agency_id = agency(&h).await;
        let realtor_id = active_realtor(&h).await;

        h.service
            .invite_realtor(&ctx_for(agency_id, RoleSlug::Agency), REALTOR_PHONE)
            .await
            .unwrap();
        let role = h.store.user_roles(realtor_id).into_iter().find(|r| r.is_active).unwrap();
        assert_eq!(role.status, RoleStatus::InvitePending);

        h.service
            .accept_invitation(&ctx_for(realtor_id, RoleSlug::Realtor))
            .await
            .unwrap();
        let links = h.store.agency_links();
        assert_eq!(links.len(), 1);
        assert_eq!((links[0].agency_id, links[0].realtor_id), (agency_id, realtor_id));
        assert!(h.store.invites().is_empty());
        let role = h.store.user_roles(realtor_id).into_iter().find(|r| r.is_active).unwrap();
        assert_eq!(role.status, RoleStatus::Active);

        let err = h
            .service
            .invite_realtor(&ctx_for(agency_id, RoleSlug::Agency), REALTOR_PHONE)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::conflict("Realtor already linked to an agency"));
    }

    #[tokio::test]
    async fn test_reject_restores_status_without_link() {
        let h = harness();
        let agency_id = agency(&h).await;
        let realtor_id = active_realtor(&h).await;

        h.service
            .invite_realtor(&ctx_for(agency_id, RoleSlug::Agency), REALTOR_PHONE)
            .await
            .unwrap();
        h.service
            .reject_invitation(&ctx_for(realtor_id, RoleSlug::Realtor))
            .await
            .unwrap();

        assert!(h.store.agency_links().is_empty());
        assert!(h.store.invites().is_empty());
        let role = h.store.user_roles(realtor_id).into_iter().find(|r| r.is_active).unwrap();
        assert_eq!(role.status, RoleStatus::Active);
    }

    #[tokio::test]
    async fn test_answer_without_invite_is_not_found() {
        let h = harness();
        let realtor_id = active_realtor(&h).await;
        let err = h
            .service
            .accept_invitation(&ctx_for(realtor_id, RoleSlug::Realtor))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("Invitation"));
    }

    #[tokio::test]
    async fn test_only_agencies_invite() {
        let h = harness();
        let realtor_id = active_realtor(&h).await;
        let err = h
            .service
            .invite_realtor(&ctx_for(realtor_id, RoleSlug::Realtor), "+5521987654321")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}
