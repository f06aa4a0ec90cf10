//! API server builder and router

use std::fmt;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use camino::Utf8PathBuf;
use storage::Storage;

use crate::config::{DEFAULT_BUCKET, default_staging_dir};
use crate::error::{RegistryError, RegistryResult};
use crate::staging::StagingArea;
use crate::storage::RegistryStorage;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

pub(crate) fn header_value(value: impl fmt::Display) -> RegistryResult<HeaderValue> {
    Ok(HeaderValue::try_from(value.to_string())?)
}

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Storage,
    bucket: Option<String>,
    staging_dir: Option<Utf8PathBuf>,
}

impl RegistryBuilder {
    /// Create a new registry builder on top of a storage backend
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            bucket: None,
            staging_dir: None,
        }
    }

    /// Set the bucket name for storage. Defaults to `ddocker`.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the local staging directory. Defaults to a directory below the OS temp dir.
    pub fn staging_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.staging_dir = Some(path.into());
        self
    }

    /// Build the storage layer without wrapping it in a router.
    pub fn into_storage(self) -> RegistryStorage {
        let bucket = self.bucket.unwrap_or_else(|| DEFAULT_BUCKET.to_owned());
        let staging = StagingArea::new(self.staging_dir.unwrap_or_else(default_staging_dir));
        RegistryStorage::new(self.storage, bucket, staging)
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        router(self.into_storage())
    }
}

/// The registry routes, serving from `storage`.
pub fn router(storage: RegistryStorage) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/v2/", get(liveness))
        .merge(crate::blob::router())
        .merge(crate::manifest::router())
        .with_state(storage)
}

async fn liveness() -> &'static str {
    "ok"
}

fn is_safe_path_component(value: &str) -> bool {
    !value.is_empty()
        && !value.contains("..")
        && !value.starts_with('/')
        && !value.contains('\\')
        && !value.chars().any(char::is_control)
}

/// Repository names become directories in the staging area and the backend.
pub(crate) fn validate_name(name: &str) -> RegistryResult<()> {
    if !is_safe_path_component(name) {
        return Err(RegistryError::InvalidName(name.to_owned()));
    }
    Ok(())
}

pub(crate) fn validate_reference(reference: &str) -> RegistryResult<()> {
    if !is_safe_path_component(reference) || reference.contains('/') {
        return Err(RegistryError::InvalidReference(reference.to_owned()));
    }
    Ok(())
}
