/// S3-compatible object store
///
/// Built on `object_store`'s [`AmazonS3`] with one client per bucket and
/// credential profile. Downloads are presigned with the reader profile,
/// everything else uses the admin profile.
///
/// Presigned URLs sign only the `host` header. The checksum handed to an
/// uploader is checked after the upload by
/// [`StorageService::validate_object_checksum`](super::StorageService::validate_object_checksum).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt, TryStreamExt};
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, GetOptions, ObjectStore as _};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::{Bucket, ObjectHead, ObjectStore, S3Credentials, StorageConfig, StorageError};

/// Clients of one credential profile
#[derive(Debug, Clone)]
struct BucketClients {
    user_media: AmazonS3,
    listing_media: AmazonS3,
}

impl BucketClients {
    fn build(config: &StorageConfig, credentials: &S3Credentials) -> Result<Self, StorageError> {
        Ok(Self {
            user_media: build_client(config, credentials, Bucket::UserMedia)?,
            listing_media: build_client(config, credentials, Bucket::ListingMedia)?,
        })
    }

    fn bucket(&self, bucket: Bucket) -> &AmazonS3 {
        match bucket {
            Bucket::UserMedia => &self.user_media,
            Bucket::ListingMedia => &self.listing_media,
        }
    }
}

fn build_client(
    config: &StorageConfig,
    credentials: &S3Credentials,
    bucket: Bucket,
) -> Result<AmazonS3, StorageError> {
    let name = config.bucket_name(bucket);
    AmazonS3Builder::new()
        .with_endpoint(&config.endpoint)
        .with_allow_http(config.endpoint.starts_with("http://"))
        .with_virtual_hosted_style_request(false)
        .with_region(&config.region)
        .with_bucket_name(name)
        .with_access_key_id(&credentials.access_key_id)
        .with_secret_access_key(&credentials.secret_access_key)
        .build()
        .map_err(|e| StorageError::NotConfigured(format!("bucket {}: {}", name, e)))
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    admin: BucketClients,
    reader: BucketClients,
}

impl S3ObjectStore {
    /// The reader profile falls back to the admin keys when left empty
    ///
    /// # Errors
    ///
    /// Fails when the admin profile is empty or a client cannot be built.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        if config.admin.access_key_id.is_empty() || config.admin.secret_access_key.is_empty() {
            return Err(StorageError::NotConfigured("admin credentials missing".to_string()));
        }
        let reader = if config.reader.access_key_id.is_empty() {
            &config.admin
        } else {
            &config.reader
        };

        Ok(Self {
            admin: BucketClients::build(&config, &config.admin)?,
            reader: BucketClients::build(&config, reader)?,
        })
    }
}

fn is_not_found(err: &object_store::Error) -> bool {
    matches!(err, object_store::Error::NotFound { .. })
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign_put(&self, bucket: Bucket, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let url = self
            .admin
            .bucket(bucket)
            .signed_url(Method::PUT, &Path::from(key), ttl)
            .await?;
        Ok(url.to_string())
    }

    async fn presign_get(&self, bucket: Bucket, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let url = self
            .reader
            .bucket(bucket)
            .signed_url(Method::GET, &Path::from(key), ttl)
            .await?;
        Ok(url.to_string())
    }

    async fn head(&self, bucket: Bucket, key: &str) -> Result<Option<ObjectHead>, StorageError> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = match self.admin.bucket(bucket).get_opts(&Path::from(key), options).await {
            Ok(result) => result,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| value.to_string());
        let meta = result.meta;
        Ok(Some(ObjectHead {
            size: i64::try_from(meta.size).unwrap_or(i64::MAX),
            checksum: None,
            etag: meta.e_tag.map(|e| e.trim_matches('"').to_string()),
            content_type,
            last_modified: Some(meta.last_modified),
        }))
    }

    async fn content_sha256(&self, bucket: Bucket, key: &str) -> Result<Option<String>, StorageError> {
        let result = match self.admin.bucket(bucket).get(&Path::from(key)).await {
            Ok(result) => result,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut hasher = Sha256::new();
        let mut chunks = result.into_stream();
        while let Some(chunk) = chunks.try_next().await? {
            hasher.update(&chunk);
        }
        Ok(Some(STANDARD.encode(hasher.finalize())))
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), StorageError> {
        match self.admin.bucket(bucket).delete(&Path::from(key)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_objects(&self, bucket: Bucket, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > super::DELETE_BATCH_SIZE {
            return Err(StorageError::InvalidInput {
                field: "keys".to_string(),
                message: format!("at most {} keys per batch", super::DELETE_BATCH_SIZE),
            });
        }

        let locations = stream::iter(keys.iter().map(|key| Ok(Path::from(key.as_str())))).boxed();
        let failures: Vec<object_store::Error> = self
            .admin
            .bucket(bucket)
            .delete_stream(locations)
            .filter_map(|deleted| async move {
                match deleted {
                    Ok(_) => None,
                    Err(e) if is_not_found(&e) => None,
                    Err(e) => Some(e),
                }
            })
            .collect()
            .await;

        match failures.first() {
            None => Ok(()),
            Some(first) => Err(StorageError::Backend(format!(
                "failed to delete {} keys (first: {})",
                failures.len(),
                first
            ))),
        }
    }

    async fn list_keys(&self, bucket: Bucket, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = Path::from(prefix);
        let keys = self
            .admin
            .bucket(bucket)
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StorageConfig {
        StorageConfig {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            user_media_bucket: "user-media".to_string(),
            listing_media_bucket: "listing-media".to_string(),
            admin: S3Credentials {
                access_key_id: "ADMINKEY".to_string(),
                secret_access_key: "admin-secret".to_string(),
            },
            reader: S3Credentials {
                access_key_id: "READERKEY".to_string(),
                secret_access_key: "reader-secret".to_string(),
            },
            upload_ttl_secs: 900,
            download_ttl_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_downloads_are_signed_by_reader_profile() {
        let store = S3ObjectStore::new(config()).unwrap();
        let url = store
            .presign_get(Bucket::UserMedia, "5/photo.jpg", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/user-media/5/photo.jpg?"));
        assert!(url.contains("X-Amz-Credential=READERKEY"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_uploads_are_signed_by_admin_profile() {
        let store = S3ObjectStore::new(config()).unwrap();
        let url = store
            .presign_put(Bucket::ListingMedia, "1/raw/photo/vertical/a.jpg", Duration::from_secs(900))
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/listing-media/1/raw/photo/vertical/a.jpg?"));
        assert!(url.contains("X-Amz-Credential=ADMINKEY"));
        assert!(url.contains("X-Amz-Expires=900"));
    }

    #[tokio::test]
    async fn test_reader_falls_back_to_admin_keys() {
        let mut config = config();
        config.reader = S3Credentials::default();
        let store = S3ObjectStore::new(config).unwrap();

        let url = store
            .presign_get(Bucket::UserMedia, "5/photo.jpg", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.contains("X-Amz-Credential=ADMINKEY"));
    }

    #[test]
    fn test_requires_admin_credentials() {
        let err = S3ObjectStore::new(StorageConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::NotConfigured(_)));
    }
}
