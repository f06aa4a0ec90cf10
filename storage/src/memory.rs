use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{Driver, Reader, StorageError, StorageErrorKind, Writer};

const MEMORY_ENGINE: &str = "memory";

type Bucket = HashMap<Utf8PathBuf, Vec<u8>>;

/// Storage driver that stores objects in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Number of objects stored in a bucket.
    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(HashMap::len)
            .unwrap_or_default()
    }
}

fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::builder(
        MEMORY_ENGINE,
        StorageErrorKind::NotFound,
        format!("Bucket not found: {bucket}"),
    )
    .bucket(bucket)
    .context("bucket not found")
    .build()
}

fn path_not_found(bucket: &str, remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        MEMORY_ENGINE,
        StorageErrorKind::NotFound,
        format!("Path not found: {remote}"),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .context("path not found")
    .build()
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        MEMORY_ENGINE
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        // Objects only become visible once the whole reader has been consumed.
        tokio::io::copy(local, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        bucket_map.insert(remote.to_owned(), buf);

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let data = bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?;

        local
            .write_all(data)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        Ok(())
    }
}
