//! Object storage
//!
//! [`StorageService`] derives object keys and presigned envelopes for the
//! two logical buckets (`user-media`, `listing-media`) on top of an
//! [`ObjectStore`] adapter. Presigning needs no round trip; HEAD, delete
//! and list are the I/O surface.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use toq_shared::storage::{StorageConfig, StorageService, PhotoKind};
//! use toq_shared::memory::MemoryObjectStore;
//!
//! # async fn example() -> Result<(), toq_shared::storage::StorageError> {
//! let service = StorageService::new(Arc::new(MemoryObjectStore::new()), StorageConfig::default());
//! let envelope = service.photo_upload_url(42, PhotoKind::Profile, Some("image/jpeg")).await?;
//! assert_eq!(envelope.object_key, "42/photo.jpg");
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod listing;
pub mod s3;

pub use checksum::{normalize_checksum, sha256_base64};
pub use listing::{ListingAsset, MediaAssetType};
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DomainError;

/// Maximum keys per `DeleteObjects` call
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Concurrent `DeleteObjects` calls when removing a user folder
pub const DELETE_CONCURRENCY: usize = 5;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage adapter not configured: {0}")]
    NotConfigured(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidInput { field, message } => DomainError::validation(field, message),
            StorageError::ChecksumMismatch => DomainError::conflict("checksum mismatch"),
            StorageError::NotFound(_) => DomainError::not_found("object"),
            other => DomainError::internal(other),
        }
    }
}

/// Logical bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    UserMedia,
    ListingMedia,
}

/// HTTP method of a presigned request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    Put,
    Get,
}

/// Envelope handed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedRequest {
    pub url: String,
    pub method: PresignMethod,
    pub headers: BTreeMap<String, String>,
    pub expires_in_seconds: u64,
    pub object_key: String,
}

/// Object metadata returned by HEAD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHead {
    pub size: i64,
    /// Base64 SHA-256 as stored by the object store
    pub checksum: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object store adapter
///
/// `delete` and `delete_objects` treat missing keys as success.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn presign_put(&self, bucket: Bucket, key: &str, ttl: Duration) -> Result<String, StorageError>;

    async fn presign_get(&self, bucket: Bucket, key: &str, ttl: Duration) -> Result<String, StorageError>;

    async fn head(&self, bucket: Bucket, key: &str) -> Result<Option<ObjectHead>, StorageError>;

    /// Base64 SHA-256 of the stored bytes, `None` when the object is missing
    async fn content_sha256(&self, bucket: Bucket, key: &str) -> Result<Option<String>, StorageError>;

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), StorageError>;

    /// Deletes at most [`DELETE_BATCH_SIZE`] keys
    async fn delete_objects(&self, bucket: Bucket, keys: &[String]) -> Result<(), StorageError>;

    /// Every key under `prefix`, following the store's pagination
    async fn list_keys(&self, bucket: Bucket, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Access keys for one credential profile
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// S3-compatible endpoint, e.g. `https://s3.sa-east-1.amazonaws.com`
    pub endpoint: String,
    pub region: String,
    pub user_media_bucket: String,
    pub listing_media_bucket: String,
    /// Profile used for writes, deletes and listings
    pub admin: S3Credentials,
    /// Profile used for download presigning
    pub reader: S3Credentials,
    pub upload_ttl_secs: u64,
    pub download_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            user_media_bucket: "user-media".to_string(),
            listing_media_bucket: "listing-media".to_string(),
            admin: S3Credentials::default(),
            reader: S3Credentials::default(),
            upload_ttl_secs: 900,
            download_ttl_secs: 3600,
        }
    }
}

impl StorageConfig {
    /// Reads `STORAGE_*` variables; the reader profile falls back to the
    /// admin profile when unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, default: String| env::var(name).unwrap_or(default);

        let admin = S3Credentials {
            access_key_id: var("STORAGE_ADMIN_ACCESS_KEY_ID", String::new()),
            secret_access_key: var("STORAGE_ADMIN_SECRET_ACCESS_KEY", String::new()),
        };
        let reader = S3Credentials {
            access_key_id: var("STORAGE_READER_ACCESS_KEY_ID", admin.access_key_id.clone()),
            secret_access_key: var(
                "STORAGE_READER_SECRET_ACCESS_KEY",
                admin.secret_access_key.clone(),
            ),
        };

        Self {
            endpoint: var("STORAGE_ENDPOINT", defaults.endpoint),
            region: var("STORAGE_REGION", defaults.region),
            user_media_bucket: var("STORAGE_USER_MEDIA_BUCKET", defaults.user_media_bucket),
            listing_media_bucket: var("STORAGE_LISTING_MEDIA_BUCKET", defaults.listing_media_bucket),
            admin,
            reader,
            upload_ttl_secs: env::var("STORAGE_UPLOAD_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.upload_ttl_secs),
            download_ttl_secs: env::var("STORAGE_DOWNLOAD_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.download_ttl_secs),
        }
    }

    pub fn bucket_name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::UserMedia => &self.user_media_bucket,
            Bucket::ListingMedia => &self.listing_media_bucket,
        }
    }
}

/// Profile photo and its thumbnails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoKind {
    Profile,
    ThumbnailSmall,
    ThumbnailMedium,
    ThumbnailLarge,
}

impl PhotoKind {
    fn path(self) -> &'static str {
        match self {
            PhotoKind::Profile => "photo.jpg",
            PhotoKind::ThumbnailSmall => "thumbnails/small.jpg",
            PhotoKind::ThumbnailMedium => "thumbnails/medium.jpg",
            PhotoKind::ThumbnailLarge => "thumbnails/large.jpg",
        }
    }
}

/// CRECI verification documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Selfie,
    Front,
    Back,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [DocumentKind::Selfie, DocumentKind::Front, DocumentKind::Back];

    fn path(self) -> &'static str {
        match self {
            DocumentKind::Selfie => "selfie.jpg",
            DocumentKind::Front => "front.jpg",
            DocumentKind::Back => "back.jpg",
        }
    }
}

/// Key of a user-media object
pub fn user_media_key(user_id: i64, path: &str) -> String {
    format!("{}/{}", user_id, path)
}

/// Storage facade used by the identity service and the API
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn ObjectStore>,
    config: Arc<StorageConfig>,
}

impl fmt::Debug for StorageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StorageService {
    pub fn new(store: Arc<dyn ObjectStore>, config: StorageConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.config.upload_ttl_secs)
    }

    fn download_ttl(&self) -> Duration {
        Duration::from_secs(self.config.download_ttl_secs)
    }

    async fn put_envelope(
        &self,
        bucket: Bucket,
        key: String,
        content_type: Option<&str>,
        checksum: Option<String>,
    ) -> Result<PresignedRequest, StorageError> {
        let mut headers = BTreeMap::new();
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        headers.insert("Content-Type".to_string(), content_type.to_string());
        if let Some(sum) = checksum.filter(|s| !s.is_empty()) {
            headers.insert("x-amz-checksum-sha256".to_string(), sum);
        }

        let ttl = self.upload_ttl();
        let url = self.store.presign_put(bucket, &key, ttl).await?;
        Ok(PresignedRequest {
            url,
            method: PresignMethod::Put,
            headers,
            expires_in_seconds: ttl.as_secs(),
            object_key: key,
        })
    }

    async fn get_envelope(&self, bucket: Bucket, key: String) -> Result<PresignedRequest, StorageError> {
        let ttl = self.download_ttl();
        let url = self.store.presign_get(bucket, &key, ttl).await?;
        Ok(PresignedRequest {
            url,
            method: PresignMethod::Get,
            headers: BTreeMap::new(),
            expires_in_seconds: ttl.as_secs(),
            object_key: key,
        })
    }

    pub async fn photo_upload_url(
        &self,
        user_id: i64,
        kind: PhotoKind,
        content_type: Option<&str>,
    ) -> Result<PresignedRequest, StorageError> {
        self.put_envelope(Bucket::UserMedia, user_media_key(user_id, kind.path()), content_type, None)
            .await
    }

    pub async fn photo_download_url(
        &self,
        user_id: i64,
        kind: PhotoKind,
    ) -> Result<PresignedRequest, StorageError> {
        self.get_envelope(Bucket::UserMedia, user_media_key(user_id, kind.path())).await
    }

    pub async fn document_upload_url(
        &self,
        user_id: i64,
        kind: DocumentKind,
        content_type: Option<&str>,
    ) -> Result<PresignedRequest, StorageError> {
        self.put_envelope(Bucket::UserMedia, user_media_key(user_id, kind.path()), content_type, None)
            .await
    }

    pub async fn document_download_url(
        &self,
        user_id: i64,
        kind: DocumentKind,
    ) -> Result<PresignedRequest, StorageError> {
        self.get_envelope(Bucket::UserMedia, user_media_key(user_id, kind.path())).await
    }

    /// Whether the three CRECI documents were uploaded
    pub async fn documents_present(&self, user_id: i64) -> Result<bool, StorageError> {
        for kind in DocumentKind::ALL {
            let key = user_media_key(user_id, kind.path());
            if self.store.head(Bucket::UserMedia, &key).await?.is_none() {
                tracing::debug!(user_id, key = %key, "CRECI document missing");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The keyspace is flat, there is nothing to create
    pub async fn create_user_folder(&self, user_id: i64) -> Result<(), StorageError> {
        tracing::debug!(user_id, "User media folder is implicit");
        Ok(())
    }

    /// Deletes every object under `{user_id}/`, returns the number of keys
    pub async fn delete_user_folder(&self, user_id: i64) -> Result<usize, StorageError> {
        let prefix = format!("{}/", user_id);
        let keys = self.store.list_keys(Bucket::UserMedia, &prefix).await?;

        let total = keys.len();
        if total == 0 {
            return Ok(0);
        }

        let store = Arc::clone(&self.store);
        stream::iter(keys.chunks(DELETE_BATCH_SIZE).map(|c| c.to_vec()))
            .map(|batch| {
                let store = Arc::clone(&store);
                async move { store.delete_objects(Bucket::UserMedia, &batch).await }
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;

        tracing::info!(user_id, deleted = total, "User media folder deleted");
        Ok(total)
    }

    /// Presigned PUT for a raw listing upload
    pub async fn raw_upload_url(
        &self,
        listing_id: i64,
        asset: &ListingAsset,
        content_type: Option<&str>,
        checksum: Option<&str>,
    ) -> Result<PresignedRequest, StorageError> {
        listing::check_listing_id(listing_id)?;
        let checksum = checksum.map(normalize_checksum).transpose()?;
        let content_type = content_type.or(asset.content_type.as_deref());
        let key = listing::raw_object_key(listing_id, asset);
        self.put_envelope(Bucket::ListingMedia, key, content_type, checksum).await
    }

    /// Presigned GET for a processed rendition
    pub async fn processed_download_url(
        &self,
        listing_id: i64,
        asset: &ListingAsset,
        resolution: Option<&str>,
    ) -> Result<PresignedRequest, StorageError> {
        listing::check_listing_id(listing_id)?;
        let key = listing::processed_object_key(listing_id, asset, resolution);
        self.get_envelope(Bucket::ListingMedia, key).await
    }

    /// HEADs `key` and compares its stored SHA-256 with `expected`
    ///
    /// # Errors
    ///
    /// `NotFound` when the object is missing, `ChecksumMismatch` when the
    /// stored checksum differs, `InvalidInput` when `expected` is malformed.
    pub async fn validate_object_checksum(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<ObjectHead, StorageError> {
        let expected = normalize_checksum(expected)?;
        let head = self
            .store
            .head(Bucket::ListingMedia, key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        if !expected.is_empty() {
            let stored = match head.checksum.as_deref() {
                Some(sum) => normalize_checksum(sum)?,
                None => self
                    .store
                    .content_sha256(Bucket::ListingMedia, key)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(key.to_string()))?,
            };
            if stored != expected {
                tracing::warn!(key = %key, "Object checksum mismatch");
                return Err(StorageError::ChecksumMismatch);
            }
        }
        Ok(head)
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(());
        }
        self.store.delete(Bucket::ListingMedia, key).await
    }

    /// Deletes a set of listing-media keys; blank and duplicate keys are
    /// dropped and missing objects count as deleted
    pub async fn delete_keys(&self, keys: &[String]) -> Result<usize, StorageError> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && seen.insert(k.to_string()))
            .map(str::to_string)
            .collect();

        for batch in unique.chunks(DELETE_BATCH_SIZE) {
            self.store.delete_objects(Bucket::ListingMedia, batch).await?;
        }
        Ok(unique.len())
    }
}
