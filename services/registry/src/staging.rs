//! Local scratch space for uploads, manifests and read-path downloads.

use std::io;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use futures::{Stream, TryStreamExt as _};
use tokio::io::{AsyncWrite, AsyncWriteExt as _, BufWriter};
use uuid::Uuid;

use crate::digest::{Digest, DigestWriter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A filesystem operation in the staging area failed.
#[derive(Debug, thiserror::Error)]
#[error("staging: {action} {path}")]
pub struct StagingError {
    action: &'static str,
    path: Utf8PathBuf,
    #[source]
    source: io::Error,
}

impl StagingError {
    fn new(action: &'static str, path: &Utf8Path, source: io::Error) -> Self {
        Self {
            action,
            path: path.to_owned(),
            source,
        }
    }

    /// The path the operation was acting on.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Directory-backed staging area.
///
/// Layout below the root:
///
/// - `blobs/{uuid}`: an upload in progress
/// - `blobs/{digest}`: a verified blob waiting to be pushed
/// - `manifests/{name}/{reference}`: a manifest waiting to be pushed
/// - `get/{uuid}`: an object downloaded to be served
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: Utf8PathBuf,
}

impl StagingArea {
    /// Create a staging area rooted at `root`. Nothing is created on disk yet.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Staging file for an upload session.
    pub fn upload_path(&self, id: &Uuid) -> Utf8PathBuf {
        self.root.join("blobs").join(id.to_string())
    }

    /// Staging file for a verified blob.
    pub fn blob_path(&self, digest: &Digest) -> Utf8PathBuf {
        self.root.join("blobs").join(digest.to_string())
    }

    /// Staging file for a manifest.
    pub fn manifest_path(&self, name: &str, reference: &str) -> Utf8PathBuf {
        let mut path = self.root.join("manifests");
        path.push(name);
        path.push(reference);
        path
    }

    /// A fresh, unique file for materializing a downloaded object.
    pub fn read_path(&self) -> Utf8PathBuf {
        self.root.join("get").join(Uuid::new_v4().to_string())
    }

    /// Create any missing ancestors of `path`.
    pub async fn ensure_directory(&self, path: &Utf8Path) -> Result<(), StagingError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StagingError::new("create directory", parent, err))
    }

    /// Open a file for appending, creating it (and its directory) if needed.
    pub async fn open_for_append(&self, path: &Utf8Path) -> Result<StagedFile, StagingError> {
        self.ensure_directory(path).await?;
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(|err| StagingError::new("open for append", path, err))?;
        Ok(StagedFile::new(path, file))
    }

    /// Open a file for writing, truncating any previous content.
    pub async fn open_for_write(&self, path: &Utf8Path) -> Result<StagedFile, StagingError> {
        self.ensure_directory(path).await?;
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|err| StagingError::new("open for write", path, err))?;
        Ok(StagedFile::new(path, file))
    }

    /// Atomically move a staged file to its final name.
    pub async fn finalize(&self, temp: &Utf8Path, target: &Utf8Path) -> Result<(), StagingError> {
        self.ensure_directory(target).await?;
        tokio::fs::rename(temp, target)
            .await
            .map_err(|err| StagingError::new("rename", temp, err))
    }

    /// Remove a staged file, logging (but otherwise ignoring) failures.
    pub async fn discard(&self, path: &Utf8Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::trace!(%path, "discarded staging file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(%path, "failed to discard staging file: {err}"),
        }
    }
}

/// A write handle on a staging file.
#[derive(Debug)]
pub struct StagedFile {
    path: Utf8PathBuf,
    file: BufWriter<tokio::fs::File>,
}

impl StagedFile {
    fn new(path: &Utf8Path, file: tokio::fs::File) -> Self {
        Self {
            path: path.to_owned(),
            file: BufWriter::new(file),
        }
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Copy a body stream into the file, then flush and close it.
    ///
    /// Returns the number of bytes written.
    pub async fn write_stream<S, E>(self, stream: S) -> Result<u64, StagingError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        let StagedFile { path, mut file } = self;
        let written = copy_and_close(&path, stream, &mut file).await?;
        Ok(written)
    }

    /// Like [`StagedFile::write_stream`], also hashing the bytes as they are written.
    pub async fn write_stream_digested<S, E>(
        self,
        stream: S,
    ) -> Result<(Digest, u64), StagingError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        let StagedFile { path, file } = self;
        let mut writer = DigestWriter::new(file);
        let written = copy_and_close(&path, stream, &mut writer).await?;
        Ok((writer.finish(), written))
    }
}

async fn copy_and_close<S, E, W>(
    path: &Utf8Path,
    stream: S,
    writer: &mut W,
) -> Result<u64, StagingError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
    W: AsyncWrite + Unpin,
{
    let mut reader = tokio_util::io::StreamReader::new(
        stream.map_err(|err| io::Error::other(Into::<BoxError>::into(err))),
    );

    let copied = tokio::io::copy(&mut reader, writer).await;
    let closed = writer.shutdown().await;

    let written = copied.map_err(|err| StagingError::new("write", path, err))?;
    closed.map_err(|err| StagingError::new("close", path, err))?;
    Ok(written)
}
