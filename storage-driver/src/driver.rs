use std::{fmt, ops::Deref, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::{self, AsyncWriteExt};

use crate::error::{StorageError, StorageErrorKind};

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

const LOCAL_ENGINE: &str = "tokio::fs";

/// A storage driver, which provides whole-object access to a storage backend.
///
/// Objects are addressed by a bucket name and a remote path inside that bucket.
/// Drivers never expose partially written objects: an upload either replaces the
/// object at `remote` entirely, or leaves it untouched.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Look up the bucket, creating it if it does not exist yet.
    ///
    /// Must succeed for every caller when several callers race to create the
    /// same bucket.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Upload a file to the storage, using a reader stream to provide the contents.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Download a file from storage, into a writer stream.
    ///
    /// Missing objects are reported with [`StorageErrorKind::NotFound`] before
    /// anything is written.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// Path of the object on the local disk, for drivers which keep objects
    /// locally and can hand out a direct file handle.
    ///
    /// Drivers which only stream objects return `Ok(None)`.
    async fn local_file(
        &self,
        _bucket: &str,
        _remote: &Utf8Path,
    ) -> Result<Option<Utf8PathBuf>, StorageError> {
        Ok(None)
    }

    /// Download a file from storage, into a local file.
    async fn download_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        tracing::trace!(%remote, %local, "Downloading to file: {local}");

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("create parents of local destination file")
                .map_err(StorageError::with(LOCAL_ENGINE, StorageErrorKind::Io))?;
        }
        let mut file = tokio::io::BufWriter::new(
            tokio::fs::File::create(local)
                .await
                .wrap_err("create local file for writing")
                .map_err(StorageError::with(LOCAL_ENGINE, StorageErrorKind::Io))?,
        );
        self.download(bucket, remote, &mut file).await?;
        file.shutdown()
            .await
            .wrap_err("shutdown file buffer")
            .map_err(StorageError::with(LOCAL_ENGINE, StorageErrorKind::Io))?;
        Ok(())
    }

    /// Upload a file to storage, from a local file.
    async fn upload_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        tracing::trace!(%remote, %local, "Uploading from file: {local}");
        let mut file = tokio::io::BufReader::new(
            tokio::fs::File::open(local)
                .await
                .wrap_err("open local file for reading")
                .map_err(StorageError::with(LOCAL_ENGINE, StorageErrorKind::Io))?,
        );

        self.upload(bucket, remote, &mut file).await
    }
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.deref().ensure_bucket(bucket).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn local_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Option<Utf8PathBuf>, StorageError> {
        self.deref().local_file(bucket, remote).await
    }

    async fn download_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().download_file(bucket, remote, local).await
    }

    async fn upload_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().upload_file(bucket, remote, local).await
    }
}
