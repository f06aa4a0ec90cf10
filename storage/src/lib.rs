//! # Storage backends
//!
//! Configuration and unification for the storage backends the registry can
//! push objects to and pull them from.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tokio::io;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Credential, Driver, Reader, StorageError, StorageErrorKind, Writer};

/// Which backend to store registry objects in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep everything in process memory.
    Memory,

    /// Keep objects as files below a local directory.
    #[cfg(feature = "local")]
    Local {
        /// Root directory, one sub-directory per bucket.
        path: Utf8PathBuf,
    },

    /// A remote bucket service.
    #[cfg(feature = "bucket")]
    Bucket(bucket_client::BucketServiceConfig),

    /// A remote bucket service, configured from the environment.
    #[cfg(feature = "bucket")]
    #[serde(alias = "bucketenv")]
    BucketEnv,

    /// A storage daemon on the local host.
    #[cfg(feature = "daemon")]
    Daemon(daemon_client::DaemonConfig),

    /// A storage daemon on the local host, configured from the environment.
    #[cfg(feature = "daemon")]
    #[serde(alias = "daemonenv")]
    DaemonEnv,
}

impl StorageConfig {
    /// Construct the configured driver.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory => MemoryStorage::new().into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "bucket")]
            StorageConfig::Bucket(config) => bucket_client::BucketClient::new(config).into(),
            #[cfg(feature = "bucket")]
            StorageConfig::BucketEnv => bucket_client::BucketServiceConfig::from_env()
                .map_err(StorageError::with("bucket", StorageErrorKind::InvalidRequest))?
                .client()
                .into(),
            #[cfg(feature = "daemon")]
            StorageConfig::Daemon(config) => daemon_client::DaemonClient::new(config).into(),
            #[cfg(feature = "daemon")]
            StorageConfig::DaemonEnv => daemon_client::DaemonConfig::from_env()
                .map_err(StorageError::with("daemon", StorageErrorKind::InvalidRequest))?
                .client()
                .into(),
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// Shared handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle bound to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// Storage handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// Name of the bucket.
    pub fn name(&self) -> &str {
        &self.bucket
    }

    /// Name of the underlying driver.
    pub fn driver(&self) -> &str {
        self.driver.name()
    }

    /// Get or create the bucket.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn ensure(&self) -> Result<(), StorageError> {
        self.driver.ensure_bucket(&self.bucket).await
    }

    /// Download an object into a writer stream.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await?;
        Ok(())
    }

    /// Upload an object from a reader stream.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await?;
        Ok(())
    }

    /// Upload an object from a local file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn upload_file(
        &self,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver.upload_file(&self.bucket, remote, local).await
    }

    /// Download an object into a local file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn download_file(
        &self,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver.download_file(&self.bucket, remote, local).await
    }

    /// Direct local path of an object, if the driver keeps objects on disk.
    pub async fn local_file(&self, remote: &Utf8Path) -> Result<Option<Utf8PathBuf>, StorageError> {
        self.driver.local_file(&self.bucket, remote).await
    }
}
