use camino::{Utf8Path, Utf8PathBuf};
use eyre::Context;
use tokio::io::AsyncWriteExt;

use storage_driver::{Driver, Reader, StorageError, StorageErrorKind, Writer};

/// Stores objects as plain files under `{root}/{bucket}/{remote}`.
///
/// Objects live on the local disk, so reads hand out the object file directly
/// instead of copying it.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at the given directory.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push(remote);
        path
    }

    fn error(&self, bucket: &str, remote: &Utf8Path, err: std::io::Error) -> StorageError {
        StorageError::builder(self.name(), StorageErrorKind::from_io(&err), err)
            .bucket(bucket)
            .path(remote.as_str())
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        // create_dir_all tolerates the directory appearing concurrently.
        tokio::fs::create_dir_all(self.root.join(bucket))
            .await
            .wrap_err("create bucket directory")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let target = self.path(bucket, remote);
        let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("not an object path: {remote}"),
            )
            .bucket(bucket)
            .build());
        };

        tokio::fs::create_dir_all(parent)
            .await
            .context("create_dir_all")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))?;

        let partial = parent.join(format!(".{name}.{}.partial", uuid::Uuid::new_v4()));
        let written = write_object(&partial, local).await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::new(self.name(), StorageErrorKind::Io, err));
        }

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|err| self.error(bucket, remote, err))?;

        tracing::trace!(%target, "stored object");
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(|err| self.error(bucket, remote, err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .context("copy")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))?;

        local
            .flush()
            .await
            .context("flush writer")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))?;

        Ok(())
    }

    async fn local_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Option<Utf8PathBuf>, StorageError> {
        let path = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.error(bucket, remote, err))?;

        if !metadata.is_file() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("not a file: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        Ok(Some(path))
    }
}

async fn write_object(path: &Utf8Path, local: &mut Reader<'_>) -> eyre::Result<()> {
    let mut writer = tokio::io::BufWriter::new(
        tokio::fs::File::create(path)
            .await
            .context("local: create partial file")?,
    );

    tokio::io::copy(local, &mut writer).await.context("copy")?;
    writer.shutdown().await.context("shutdown writer")?;
    Ok(())
}
