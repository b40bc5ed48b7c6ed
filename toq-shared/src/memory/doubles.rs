/// Recording collaborators

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::DomainError;
use crate::notification::{NotificationError, NotificationGateway, NotificationRequest};
use crate::repository::{CleanupReport, ListingCleanupPort, PermissionCache, PhotoSessionPort};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Gateway that records every delivered request
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<NotificationRequest>>,
    failure: Option<String>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway rejecting every request with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        lock(&self.sent).clone()
    }

    fn record(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        if let Some(message) = &self.failure {
            return Err(NotificationError::Gateway(message.clone()));
        }
        lock(&self.sent).push(request);
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        self.record(NotificationRequest::email(to, subject, body))
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError> {
        self.record(NotificationRequest::sms(to, body))
    }

    async fn send_push(
        &self,
        token: &str,
        title: &str,
        body: &str,
        image_url: Option<&str>,
        data: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError> {
        let mut request = NotificationRequest::push(token, title, body).with_data(data);
        request.image_url = image_url.map(str::to_string);
        self.record(request)
    }
}

/// Listing cascade that records which users were cleaned up
#[derive(Debug, Default)]
pub struct RecordingListingCleanup {
    owners: Mutex<Vec<i64>>,
    realtors: Mutex<Vec<i64>>,
}

impl RecordingListingCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owners(&self) -> Vec<i64> {
        lock(&self.owners).clone()
    }

    pub fn realtors(&self) -> Vec<i64> {
        lock(&self.realtors).clone()
    }
}

#[async_trait]
impl ListingCleanupPort for RecordingListingCleanup {
    async fn cleanup_owner(&self, user_id: i64) -> Result<CleanupReport, DomainError> {
        lock(&self.owners).push(user_id);
        Ok(CleanupReport::default())
    }

    async fn cleanup_realtor(&self, user_id: i64) -> Result<CleanupReport, DomainError> {
        lock(&self.realtors).push(user_id);
        Ok(CleanupReport::default())
    }
}

/// Agendas kept as "covered until" per photographer
#[derive(Debug, Default)]
pub struct MemoryPhotoSessions {
    agendas: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl MemoryPhotoSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn covered_until(&self, photographer_id: i64) -> Option<DateTime<Utc>> {
        lock(&self.agendas).get(&photographer_id).copied()
    }

    fn horizon(months: u32) -> DateTime<Utc> {
        let now = Utc::now();
        now.checked_add_months(Months::new(months)).unwrap_or(now)
    }
}

#[async_trait]
impl PhotoSessionPort for MemoryPhotoSessions {
    async fn ensure_agenda(&self, photographer_id: i64, horizon_months: u32) -> Result<(), DomainError> {
        lock(&self.agendas)
            .entry(photographer_id)
            .or_insert_with(|| Self::horizon(horizon_months));
        Ok(())
    }

    async fn extend_agenda(&self, photographer_id: i64, horizon_months: u32) -> Result<bool, DomainError> {
        let target = Self::horizon(horizon_months);
        let mut agendas = lock(&self.agendas);
        match agendas.get(&photographer_id) {
            // Agendas are compared at day granularity
            Some(until) if until.date_naive() >= target.date_naive() => Ok(false),
            _ => {
                agendas.insert(photographer_id, target);
                Ok(true)
            }
        }
    }
}

/// Permission cache that records invalidations
#[derive(Debug, Default)]
pub struct RecordingPermissionCache {
    invalidated: Mutex<Vec<i64>>,
}

impl RecordingPermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidated(&self) -> Vec<i64> {
        lock(&self.invalidated).clone()
    }
}

#[async_trait]
impl PermissionCache for RecordingPermissionCache {
    async fn invalidate(&self, user_id: i64) -> Result<(), DomainError> {
        lock(&self.invalidated).push(user_id);
        Ok(())
    }
}
