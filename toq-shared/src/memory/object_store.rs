/// In-memory object store
///
/// Objects are kept per bucket with their SHA-256 checksum. Presigned URLs
/// point at a fake `memory://` host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::storage::{
    sha256_base64, Bucket, ObjectHead, ObjectStore, StorageError, DELETE_BATCH_SIZE,
};

#[derive(Debug, Clone)]
struct StoredObject {
    size: i64,
    checksum: String,
    /// Whether HEAD reports the checksum, as S3 does for checksummed uploads
    checksum_on_head: bool,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<Bucket, BTreeMap<String, StoredObject>>,
    delete_batches: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores `bytes` as if a client had uploaded them
    pub fn put(&self, bucket: Bucket, key: &str, bytes: Vec<u8>) {
        self.insert(bucket, key, &bytes, true);
    }

    /// Stores `bytes` without a checksum on HEAD, like a plain PUT
    pub fn put_unchecksummed(&self, bucket: Bucket, key: &str, bytes: Vec<u8>) {
        self.insert(bucket, key, &bytes, false);
    }

    fn insert(&self, bucket: Bucket, key: &str, bytes: &[u8], checksum_on_head: bool) {
        let object = StoredObject {
            size: bytes.len() as i64,
            checksum: sha256_base64(bytes),
            checksum_on_head,
            last_modified: Utc::now(),
        };
        self.lock()
            .objects
            .entry(bucket)
            .or_default()
            .insert(key.to_string(), object);
    }

    pub fn contains(&self, bucket: Bucket, key: &str) -> bool {
        self.lock()
            .objects
            .get(&bucket)
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn object_count(&self, bucket: Bucket) -> usize {
        self.lock().objects.get(&bucket).map(BTreeMap::len).unwrap_or(0)
    }

    /// Sizes of every `delete_objects` call so far
    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        self.lock().delete_batches.clone()
    }

    fn url(bucket: Bucket, key: &str, ttl: Duration) -> String {
        let name = match bucket {
            Bucket::UserMedia => "user-media",
            Bucket::ListingMedia => "listing-media",
        };
        format!("memory://{}/{}?expires={}", name, key, ttl.as_secs())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn presign_put(&self, bucket: Bucket, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(Self::url(bucket, key, ttl))
    }

    async fn presign_get(&self, bucket: Bucket, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(Self::url(bucket, key, ttl))
    }

    async fn head(&self, bucket: Bucket, key: &str) -> Result<Option<ObjectHead>, StorageError> {
        Ok(self
            .lock()
            .objects
            .get(&bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| ObjectHead {
                size: object.size,
                checksum: object.checksum_on_head.then(|| object.checksum.clone()),
                etag: Some(format!("\"{}\"", &object.checksum)),
                content_type: None,
                last_modified: Some(object.last_modified),
            }))
    }

    async fn content_sha256(&self, bucket: Bucket, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .lock()
            .objects
            .get(&bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.checksum.clone()))
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), StorageError> {
        if let Some(objects) = self.lock().objects.get_mut(&bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: Bucket, keys: &[String]) -> Result<(), StorageError> {
        if keys.len() > DELETE_BATCH_SIZE {
            return Err(StorageError::InvalidInput {
                field: "keys".to_string(),
                message: format!("at most {} keys per batch", DELETE_BATCH_SIZE),
            });
        }

        let mut inner = self.lock();
        inner.delete_batches.push(keys.len());
        if let Some(objects) = inner.objects.get_mut(&bucket) {
            for key in keys {
                objects.remove(key);
            }
        }
        Ok(())
    }

    async fn list_keys(&self, bucket: Bucket, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock()
            .objects
            .get(&bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
