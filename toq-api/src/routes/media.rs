/// Media-processing callback
///
/// The external processing worker posts the outcome of a job:
///
/// ```text
/// POST /v1/media/callback
/// X-Toq-Signature: sha256=<hex hmac of the body>
///
/// { "job_id": 12, "status": "succeeded", "outputs": {...} }
/// ```
///
/// The signature is required whenever a callback secret is configured.
/// Terminal jobs are final: repeating the same outcome is acknowledged,
/// a different one is a conflict.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::context::Ctx,
};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Serialize;
use toq_shared::auth::signature::{verify_signature, SIGNATURE_HEADER};
use toq_shared::error::DomainError;
use toq_shared::models::{MediaJob, MediaJobCallback, MediaJobStatus};
use toq_shared::repository::{IdentityStore, MediaJobRepository, TransactionPort};

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub job_id: i64,
    pub status: MediaJobStatus,
}

pub async fn media_callback<S: IdentityStore>(
    State(state): State<AppState<S>>,
    Ctx(ctx): Ctx,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CallbackResponse>> {
    if let Some(secret) = &state.config.media_callback_secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret.as_bytes(), &body, provided) {
            tracing::warn!(request_id = ctx.request_id(), security = true, "Media callback signature rejected");
            return Err(ApiError::unauthorized("invalid signature"));
        }
    }

    let callback: MediaJobCallback = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid callback body: {}", e)))?;

    let mut tx = state.store.begin().await?;
    match apply(state.store.as_ref(), &mut tx, &callback).await {
        Ok(job) => {
            state.store.commit(tx).await?;
            tracing::info!(
                request_id = ctx.request_id(),
                job_id = job.id,
                listing_id = job.listing_id,
                status = ?job.status,
                "Media job updated"
            );
            Ok(Json(CallbackResponse {
                job_id: job.id,
                status: job.status,
            }))
        }
        Err(e) => {
            if let Err(rb) = state.store.rollback(tx).await {
                tracing::warn!(error = %rb, "Media callback rollback failed");
            }
            Err(e)
        }
    }
}

async fn apply<S: IdentityStore>(
    store: &S,
    tx: &mut S::Tx,
    callback: &MediaJobCallback,
) -> ApiResult<MediaJob> {
    let mut job = store
        .get_media_job(tx, callback.job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("media job {}", callback.job_id)))?;

    if job.status.is_terminal() {
        if job.status == callback.status {
            return Ok(job);
        }
        return Err(DomainError::conflict(format!(
            "media job {} already finished",
            job.id
        ))
        .into());
    }

    job.status = callback.status;
    job.error = callback.error.clone();
    if callback.outputs.is_some() {
        job.outputs = callback.outputs.clone();
    }
    job.finished_at = callback.status.is_terminal().then(Utc::now);

    store.update_media_job(tx, &job).await?;
    Ok(job)
}
