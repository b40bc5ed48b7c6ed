/// End-to-end account flows over the in-memory adapters
///
/// Run with: cargo test --test identity_flow_tests

mod common;

use common::*;
use toq_shared::blocklist::TokenBlocklist;
use toq_shared::error::{DomainError, ErrorKind};
use toq_shared::identity::{ContactChange, SigninRequest};
use toq_shared::models::{AuditTable, RoleSlug, RoleStatus};
use toq_shared::notification::Channel;
use toq_shared::storage::Bucket;
use toq_shared::telemetry::RequestContext;

const REALTOR_PHONE: &str = "+5511977776666";

fn signin_request(national_id: &str, password: &str) -> SigninRequest {
    SigninRequest {
        national_id: national_id.to_string(),
        password: password.to_string(),
        device_token: "fcm-token-integration".to_string(),
        device_id: DEVICE_ID.to_string(),
    }
}

fn active_status(ctx: &TestContext, user_id: i64) -> RoleStatus {
    ctx.store
        .user_roles(user_id)
        .into_iter()
        .find(|r| r.is_active)
        .map(|r| r.status)
        .expect("user has an active role")
}

/// Confirms both pending contact codes; returns the tokens minted on the last one
async fn confirm_contacts(
    ctx: &TestContext,
    user_id: i64,
) -> Option<toq_shared::auth::jwt::TokenPair> {
    let request = RequestContext::generate();
    let validation = ctx.store.validation(user_id).expect("signup leaves codes pending");
    ctx.service
        .confirm_contact_change(&request, user_id, ContactChange::Phone, &validation.phone_code.unwrap())
        .await
        .unwrap();
    ctx.service
        .confirm_contact_change(&request, user_id, ContactChange::Email, &validation.email_code.unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_owner_signup_confirm_signin_signout() {
    let ctx = TestContext::new().unwrap();
    let (user_id, _) = ctx
        .sign_up(RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777")
        .await
        .unwrap();
    assert_eq!(active_status(&ctx, user_id), RoleStatus::PendingProfile);

    let tokens = confirm_contacts(&ctx, user_id).await.expect("owner gets tokens when active");
    assert_eq!(active_status(&ctx, user_id), RoleStatus::Active);
    let claims = ctx.service.tokens().validate_access(&tokens.access_token).unwrap();
    assert_eq!(claims.user_info.profile_status, RoleStatus::Active);

    let tokens = ctx
        .service
        .signin(&RequestContext::generate(), signin_request("529.982.247-25", PASSWORD))
        .await
        .unwrap();
    let refreshed = ctx
        .service
        .refresh(&RequestContext::generate(), &tokens.refresh_token)
        .await
        .unwrap();
    assert_ne!(refreshed.access_token, tokens.access_token);

    let access = ctx.service.tokens().validate_access(&refreshed.access_token).unwrap();
    ctx.service
        .signout(&ctx.ctx_for(&refreshed).unwrap(), &refreshed.access_token, None)
        .await
        .unwrap();
    assert!(ctx.blocklist.exists(&access.jti).await.unwrap());
}

#[tokio::test]
async fn test_repeated_wrong_passwords_block_temporarily() {
    let ctx = TestContext::new().unwrap();
    let (user_id, _) = ctx
        .sign_up(RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777")
        .await
        .unwrap();

    for _ in 0..3 {
        let err = ctx
            .service
            .signin(&RequestContext::generate(), signin_request(OWNER_CPF, "Wrong-pass1!"))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::invalid_credentials());
    }

    // Correct password is refused while the block lasts
    let err = ctx
        .service
        .signin(&RequestContext::generate(), signin_request(OWNER_CPF, PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(ctx.store.user(user_id).unwrap().blocked_until.is_some());

    ctx.settle().await;
    let locked_email = ctx
        .gateway
        .sent()
        .into_iter()
        .filter(|r| r.channel == Channel::Email && r.to.as_deref() == Some("maria@b.com"))
        .count();
    assert!(locked_email >= 1);
}

#[tokio::test]
async fn test_realtor_onboarding_invite_and_agency_deletion() {
    let ctx = TestContext::new().unwrap();
    let admin = admin_ctx();

    let (realtor_id, _) = ctx
        .sign_up(RoleSlug::Realtor, REALTOR_CPF, "joao@b.com", REALTOR_PHONE)
        .await
        .unwrap();
    assert!(confirm_contacts(&ctx, realtor_id).await.is_none());
    assert_eq!(active_status(&ctx, realtor_id), RoleStatus::PendingImages);

    for name in ["selfie.jpg", "front.jpg", "back.jpg"] {
        ctx.objects
            .put(Bucket::UserMedia, &format!("{}/{}", realtor_id, name), vec![7; 16]);
    }
    let status = ctx
        .service
        .confirm_creci_documents(&RequestContext::generate(), realtor_id)
        .await
        .unwrap();
    assert_eq!(status, RoleStatus::PendingManual);

    ctx.service
        .approve_creci_manual(&admin, realtor_id, RoleStatus::Active)
        .await
        .unwrap();
    assert_eq!(active_status(&ctx, realtor_id), RoleStatus::Active);

    let (agency_id, agency_tokens) = ctx
        .sign_up(RoleSlug::Agency, AGENCY_CNPJ, "contato@central.com", "1133334444")
        .await
        .unwrap();
    let agency_ctx = ctx.ctx_for(&agency_tokens).unwrap();
    ctx.service.invite_realtor(&agency_ctx, REALTOR_PHONE).await.unwrap();
    assert_eq!(active_status(&ctx, realtor_id), RoleStatus::InvitePending);

    let realtor_ctx = RequestContext::generate().with_user(toq_shared::auth::jwt::UserInfos {
        id: realtor_id,
        role: RoleSlug::Realtor,
        profile_status: RoleStatus::InvitePending,
    });
    ctx.service.accept_invitation(&realtor_ctx).await.unwrap();
    assert_eq!(ctx.store.agency_links().len(), 1);
    assert_eq!(active_status(&ctx, realtor_id), RoleStatus::Active);

    let report = ctx
        .service
        .delete_account(&agency_ctx, agency_id)
        .await
        .unwrap();
    assert_eq!(report.unlinked_realtors, 1);
    assert!(ctx.store.agency_links().is_empty());

    let deleted = ctx.store.user(agency_id).unwrap();
    assert!(deleted.deleted);
    assert_eq!(deleted.email, format!("deleted+{}@toq.invalid", agency_id));

    let linked_audits = ctx
        .store
        .audit_records()
        .into_iter()
        .filter(|r| r.table_name == AuditTable::RealtorAgency)
        .count();
    assert!(linked_audits >= 1);
}

#[tokio::test]
async fn test_duplicate_signup_is_rejected() {
    let ctx = TestContext::new().unwrap();
    ctx.sign_up(RoleSlug::Owner, OWNER_CPF, "maria@b.com", "11988887777")
        .await
        .unwrap();

    let err = ctx
        .sign_up(RoleSlug::Owner, OWNER_CPF, "outra@b.com", "11911112222")
        .await
        .unwrap_err();
    let err = err.downcast::<DomainError>().unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}
