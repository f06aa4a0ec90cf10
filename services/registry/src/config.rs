//! Registry configuration

use camino::Utf8PathBuf;
use serde::Deserialize;
use storage::{StorageConfig, StorageError};

use crate::api::RegistryBuilder;

/// Bucket name used when none is configured.
pub const DEFAULT_BUCKET: &str = "ddocker";

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// Staging directory used when none is configured.
pub fn default_staging_dir() -> Utf8PathBuf {
    let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    temp.join("bucket-registry")
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_owned()
}

#[cfg(feature = "bucket")]
fn default_storage() -> StorageConfig {
    StorageConfig::BucketEnv
}

#[cfg(not(feature = "bucket"))]
fn default_storage() -> StorageConfig {
    StorageConfig::Memory
}

/// Everything needed to run a registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend bucket holding every blob and manifest.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Local staging directory.
    #[serde(default, alias = "temp-dir")]
    pub temp_dir: Option<Utf8PathBuf>,

    /// Storage backend.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bucket: default_bucket(),
            temp_dir: None,
            storage: default_storage(),
        }
    }
}

impl RegistryConfig {
    /// The staging directory, falling back to the default below the OS temp dir.
    pub fn staging_dir(&self) -> Utf8PathBuf {
        self.temp_dir.clone().unwrap_or_else(default_staging_dir)
    }

    /// Construct the storage backend and a builder configured from this.
    pub async fn builder(self) -> Result<RegistryBuilder, StorageError> {
        let staging = self.staging_dir();
        let storage = self.storage.build().await?;
        Ok(RegistryBuilder::new(storage)
            .bucket(self.bucket)
            .staging_dir(staging))
    }
}
