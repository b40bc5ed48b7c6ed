//! Audit recorder
//!
//! Appends one immutable row per mutation inside the caller's transaction.
//! The actor defaults to the authenticated user of the request context, and
//! to [`SYSTEM_ACTOR`] for background work.

use chrono::Utc;
use serde_json::Value;

use crate::error::DomainResult;
use crate::models::audit::SYSTEM_ACTOR;
use crate::models::{AuditRecord, AuditTable};
use crate::repository::AuditRepository;
use crate::telemetry::RequestContext;

/// Writes an audit row in `tx`
///
/// `executed_by` overrides the actor taken from `ctx`.
pub async fn record<S>(
    store: &S,
    tx: &mut S::Tx,
    ctx: &RequestContext,
    table: AuditTable,
    action: impl Into<String>,
    executed_by: Option<i64>,
    payload: Option<Value>,
) -> DomainResult<()>
where
    S: AuditRepository + ?Sized,
{
    let record = AuditRecord {
        executed_by: executed_by.or_else(|| ctx.user_id()).unwrap_or(SYSTEM_ACTOR),
        executed_at: Utc::now(),
        table_name: table,
        action: action.into(),
        payload,
    };
    store.insert_audit(tx, &record).await?;
    Ok(())
}
