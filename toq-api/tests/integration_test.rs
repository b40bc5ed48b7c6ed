/// Integration tests for the Toq API
///
/// These run the full router over the in-memory identity store:
/// - Health probe
/// - Signin, refresh and signout with blocklisting
/// - Error bodies for domain failures
/// - Media callback signature and state handling
/// - Admin-only rule reload

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use common::{post_json, TestContext, CALLBACK_SECRET, DEVICE_ID, PASSWORD};
use serde_json::json;
use toq_shared::auth::signature::{sign_body, SIGNATURE_HEADER};
use toq_shared::models::MediaJobStatus;
use tower::ServiceExt;

fn signin_body(password: &str) -> serde_json::Value {
    json!({
        "national_id": "529.982.247-25",
        "password": password,
        "device_token": "fcm-token-api",
        "device_id": DEVICE_ID,
    })
}

fn callback_request(body: &serde_json::Value, secret: Option<&str>) -> Request<Body> {
    let raw = body.to_string();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/media/callback")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(
            SIGNATURE_HEADER,
            format!("sha256={}", sign_body(secret.as_bytes(), raw.as_bytes())),
        );
    }
    builder.body(Body::from(raw)).unwrap()
}

#[tokio::test]
async fn test_health_reports_memory_store_connected() {
    let ctx = TestContext::new().unwrap();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = ctx.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("x-request-id"),
        "x-request-id should be echoed"
    );

    let (status, body) = ctx
        .call(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["redis"], "disabled");
}

#[tokio::test]
async fn test_signin_refresh_signout_flow() {
    let ctx = TestContext::new().unwrap();
    ctx.sign_up_owner().await.unwrap();

    let (status, tokens) = ctx
        .call(post_json("/v1/auth/signin", &signin_body(PASSWORD), None))
        .await;
    assert_eq!(status, StatusCode::OK, "body: {}", tokens);
    let access = tokens["access_token"].as_str().unwrap().to_string();
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let (status, rotated) = ctx
        .call(post_json("/v1/auth/refresh", &json!({ "refresh_token": refresh }), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(rotated["access_token"].is_string());

    let (status, expired) = ctx
        .call(post_json(
            "/v1/auth/signout",
            &json!({ "device_id": DEVICE_ID }),
            Some(&access),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(expired["access_token"].is_string());

    // The same access token is now blocklisted
    let (status, body) = ctx
        .call(post_json("/v1/auth/signout", &json!({}), Some(&access)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    assert_eq!(body["error"], "authentication");
}

#[tokio::test]
async fn test_wrong_password_is_opaque_401() {
    let ctx = TestContext::new().unwrap();
    ctx.sign_up_owner().await.unwrap();

    let (status, body) = ctx
        .call(post_json("/v1/auth/signin", &signin_body("Wrong1234!"), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid credentials");

    // Unknown national id answers exactly the same
    let mut unknown = signin_body(PASSWORD);
    unknown["national_id"] = json!("111.444.777-35");
    let (status, other) = ctx.call(post_json("/v1/auth/signin", &unknown, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(other, body);
}

#[tokio::test]
async fn test_invalid_device_id_is_validation_error() {
    let ctx = TestContext::new().unwrap();
    let mut body = signin_body(PASSWORD);
    body["device_id"] = json!("not-a-uuid");

    let (status, body) = ctx.call(post_json("/v1/auth/signin", &body, None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation");
    assert_eq!(body["details"][0]["field"], "device_id");
}

#[tokio::test]
async fn test_signout_requires_bearer() {
    let ctx = TestContext::new().unwrap();
    let (status, body) = ctx
        .call(post_json("/v1/auth/signout", &json!({}), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn test_media_callback_updates_job() {
    let ctx = TestContext::new().unwrap();
    let job_id = ctx
        .store
        .seed_media_job(42, MediaJobStatus::Processing, Utc::now() - Duration::minutes(2), None);

    let body = json!({ "job_id": job_id, "status": "succeeded", "outputs": { "thumbs": 3 } });
    let (status, response) = ctx.call(callback_request(&body, Some(CALLBACK_SECRET))).await;
    assert_eq!(status, StatusCode::OK, "body: {}", response);
    assert_eq!(response["status"], "succeeded");

    let job = ctx.store.media_job(job_id).unwrap();
    assert_eq!(job.status, MediaJobStatus::Succeeded);
    assert_eq!(job.outputs, Some(json!({ "thumbs": 3 })));
    assert!(job.finished_at.is_some());

    // Repeating the outcome is acknowledged, changing it is a conflict
    let (status, _) = ctx.call(callback_request(&body, Some(CALLBACK_SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    let failed = json!({ "job_id": job_id, "status": "failed", "error": "late" });
    let (status, response) = ctx.call(callback_request(&failed, Some(CALLBACK_SECRET))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response["code"], 409);
}

#[tokio::test]
async fn test_media_callback_rejects_bad_signature() {
    let ctx = TestContext::new().unwrap();
    let job_id = ctx
        .store
        .seed_media_job(7, MediaJobStatus::Pending, Utc::now(), None);
    let body = json!({ "job_id": job_id, "status": "processing" });

    let (status, _) = ctx.call(callback_request(&body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = ctx.call(callback_request(&body, Some("other-secret"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(ctx.store.media_job(job_id).unwrap().status, MediaJobStatus::Pending);
}

#[tokio::test]
async fn test_media_callback_unknown_job_and_bad_body() {
    let ctx = TestContext::new().unwrap();

    let missing = json!({ "job_id": 9999, "status": "failed" });
    let (status, _) = ctx.call(callback_request(&missing, Some(CALLBACK_SECRET))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let garbage = json!({ "job": "x" });
    let (status, body) = ctx.call(callback_request(&garbage, Some(CALLBACK_SECRET))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_rule_reload_is_admin_only() {
    let ctx = TestContext::new().unwrap();
    let owner = ctx.sign_up_owner().await.unwrap();

    let (status, _) = ctx
        .call(post_json("/v1/admin/rules/reload", &json!({}), Some(&owner.access_token)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = ctx.admin_tokens().unwrap();
    let (status, body) = ctx
        .call(post_json("/v1/admin/rules/reload", &json!({}), Some(&admin.access_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["rules"].as_u64().unwrap() > 0);
}
