/// Media-processing jobs
///
/// Jobs are created by the listing domain when raw uploads land; an external
/// processing worker reports back through the callback endpoint. Jobs stuck
/// in `Processing` past a timeout are failed by the reconciler, terminal jobs
/// are deleted after a retention window.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE media_jobs (
///     id BIGSERIAL PRIMARY KEY,
///     listing_id BIGINT NOT NULL,
///     status SMALLINT NOT NULL,
///     error TEXT,
///     outputs JSONB,
///     started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     finished_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum MediaJobStatus {
    Pending = 0,
    Processing = 1,
    Succeeded = 2,
    Failed = 3,
}

impl MediaJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaJobStatus::Succeeded | MediaJobStatus::Failed)
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(MediaJobStatus::Pending),
            1 => Some(MediaJobStatus::Processing),
            2 => Some(MediaJobStatus::Succeeded),
            3 => Some(MediaJobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    pub id: i64,
    pub listing_id: i64,
    pub status: MediaJobStatus,
    pub error: Option<String>,
    pub outputs: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Body posted by the external processing worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJobCallback {
    pub job_id: i64,
    pub status: MediaJobStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Option<serde_json::Value>,
}
