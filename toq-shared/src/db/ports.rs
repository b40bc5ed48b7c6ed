/// Pool-level adapters for collaborators outside the identity transaction

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::DeviceToken;
use crate::repository::{DeviceTokenRegistry, PhotoSessionPort};

/// Device tokens in the `device_tokens` table
#[derive(Debug, Clone)]
pub struct PgDeviceTokens {
    pool: PgPool,
}

impl PgDeviceTokens {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceTokenRegistry for PgDeviceTokens {
    async fn upsert(
        &self,
        user_id: i64,
        device_id: Uuid,
        push_token: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO device_tokens (user_id, device_id, push_token, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, device_id) DO UPDATE \
             SET push_token = EXCLUDED.push_token, updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(device_id)
        .bind(push_token)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_all_by_user(&self, user_id: i64) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn remove_by_device(&self, user_id: i64, device_id: Uuid) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE user_id = $1 AND device_id = $2")
            .bind(user_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_tokens_by_user_if_opted_in(
        &self,
        user_id: i64,
    ) -> Result<Vec<DeviceToken>, DomainError> {
        Ok(sqlx::query_as(
            "SELECT dt.user_id, dt.device_id, dt.push_token, dt.updated_at \
             FROM device_tokens dt JOIN users u ON u.id = dt.user_id \
             WHERE dt.user_id = $1 AND u.opt_in AND NOT u.deleted \
             ORDER BY dt.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_tokens_by_opted_in_users(&self) -> Result<Vec<DeviceToken>, DomainError> {
        Ok(sqlx::query_as(
            "SELECT dt.user_id, dt.device_id, dt.push_token, dt.updated_at \
             FROM device_tokens dt JOIN users u ON u.id = dt.user_id \
             WHERE u.opt_in AND NOT u.deleted ORDER BY dt.user_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM device_tokens WHERE (user_id, device_id) IN ( \
                 SELECT user_id, device_id FROM device_tokens WHERE updated_at < $1 LIMIT $2)",
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Photographer agendas in `photographer_agenda`
///
/// An agenda is tracked as the last calendar day it covers.
#[derive(Debug, Clone)]
pub struct PgPhotoSessions {
    pool: PgPool,
}

impl PgPhotoSessions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PhotoSessionPort for PgPhotoSessions {
    async fn ensure_agenda(
        &self,
        photographer_id: i64,
        horizon_months: u32,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO photographer_agenda (photographer_id, covered_until) \
             VALUES ($1, (CURRENT_DATE + make_interval(months => $2))::date) \
             ON CONFLICT (photographer_id) DO NOTHING",
        )
        .bind(photographer_id)
        .bind(horizon_months as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn extend_agenda(
        &self,
        photographer_id: i64,
        horizon_months: u32,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "INSERT INTO photographer_agenda (photographer_id, covered_until) \
             VALUES ($1, (CURRENT_DATE + make_interval(months => $2))::date) \
             ON CONFLICT (photographer_id) DO UPDATE \
             SET covered_until = EXCLUDED.covered_until, updated_at = NOW() \
             WHERE photographer_agenda.covered_until < EXCLUDED.covered_until",
        )
        .bind(photographer_id)
        .bind(horizon_months as i32)
        .execute(&self.pool)
        .await?;

        let extended = result.rows_affected() > 0;
        debug!(photographer_id, extended, "Photographer agenda checked");
        Ok(extended)
    }
}
