//! Storage layer for the registry
//!
//! Everything is staged on local disk first. Objects are only pushed to the
//! backend once their content is complete and their digest is known.

use std::sync::Arc;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use futures::Stream;
use storage::{Storage, StorageBucket, StorageError};
use tokio::fs::File;
use tokio::io::AsyncSeekExt as _;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::digest::{Digest, digest_file, digest_reader};
use crate::error::{RegistryError, RegistryResult};
use crate::session::{UploadRange, UploadSessions};
use crate::staging::StagingArea;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Registry storage backend
#[derive(Clone, Debug)]
pub struct RegistryStorage {
    bucket: StorageBucket,
    staging: StagingArea,
    sessions: UploadSessions,
    namespace: Arc<OnceCell<()>>,
}

impl RegistryStorage {
    /// Create a new registry storage
    pub fn new(storage: Storage, bucket: String, staging: StagingArea) -> Self {
        Self {
            bucket: storage.bucket(bucket),
            staging,
            sessions: UploadSessions::new(),
            namespace: Arc::new(OnceCell::new()),
        }
    }

    /// The upload session table.
    pub fn sessions(&self) -> &UploadSessions {
        &self.sessions
    }

    /// The local staging area.
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Get or create the backend bucket, at most once per registry.
    ///
    /// A failure is not remembered, the next caller tries again.
    pub async fn ensure_namespace(&self) -> Result<(), StorageError> {
        self.namespace
            .get_or_try_init(|| async {
                self.bucket.ensure().await?;
                tracing::debug!(bucket = self.bucket.name(), "namespace ready");
                Ok::<_, StorageError>(())
            })
            .await?;
        Ok(())
    }

    /// Backend path of a blob.
    fn blob_path(digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("blobs/{digest}"))
    }

    /// Backend path of a manifest.
    fn manifest_path(name: &str, reference: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("manifests/{name}/{reference}"))
    }

    /// Append a chunk to an upload session's staging file.
    #[tracing::instrument(skip(self, body))]
    pub async fn append_chunk<S, E>(&self, id: &Uuid, body: S) -> RegistryResult<UploadRange>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        if self.sessions.offset(id).is_none() {
            return Err(RegistryError::UnknownUploadSession(id.to_string()));
        }

        let path = self.staging.upload_path(id);
        let written = self
            .staging
            .open_for_append(&path)
            .await?
            .write_stream(body)
            .await?;

        let range = self.sessions.append(id, written)?;
        tracing::debug!(%range, "appended chunk");
        Ok(range)
    }

    /// Verify a completed upload against the declared digest and push it.
    ///
    /// `body` is appended as the last chunk first; it is usually empty.
    #[tracing::instrument(skip(self, body), fields(%declared))]
    pub async fn commit_blob<S, E>(&self, id: &Uuid, declared: &Digest, body: S) -> RegistryResult<()>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        self.append_chunk(id, body).await?;

        let upload = self.staging.upload_path(id);
        let actual = match digest_file(&upload).await {
            Ok(digest) => digest,
            Err(error) => {
                self.abandon(id, &upload).await;
                return Err(error.into());
            }
        };

        if &actual != declared {
            tracing::warn!(%actual, "rejecting upload with mismatched digest");
            self.abandon(id, &upload).await;
            return Err(RegistryError::DigestMismatch {
                expected: declared.clone(),
                actual,
            });
        }

        let staged = self.staging.blob_path(declared);
        let finalized = self.staging.finalize(&upload, &staged).await;
        self.sessions.remove(id);
        if let Err(error) = finalized {
            self.staging.discard(&upload).await;
            return Err(error.into());
        }

        let pushed = self.push_file(&Self::blob_path(declared), &staged).await;
        self.staging.discard(&staged).await;
        pushed?;

        tracing::info!(digest = %declared, "committed blob");
        Ok(())
    }

    async fn abandon(&self, id: &Uuid, upload: &Utf8Path) {
        self.sessions.remove(id);
        self.staging.discard(upload).await;
    }

    /// Drop an upload session and whatever it has staged so far.
    #[tracing::instrument(skip(self))]
    pub async fn abandon_upload(&self, id: &Uuid) {
        self.abandon(id, &self.staging.upload_path(id)).await;
        tracing::debug!("abandoned upload");
    }

    async fn push_file(&self, remote: &Utf8Path, local: &Utf8Path) -> RegistryResult<()> {
        self.ensure_namespace().await?;
        self.bucket.upload_file(remote, local).await?;
        Ok(())
    }

    /// Stage a manifest body, push it, and return its digest.
    #[tracing::instrument(skip(self, body))]
    pub async fn push_manifest<S, E>(
        &self,
        name: &str,
        reference: &str,
        body: S,
    ) -> RegistryResult<Digest>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        let staged = self.staging.manifest_path(name, reference);
        let written = self
            .staging
            .open_for_write(&staged)
            .await?
            .write_stream_digested(body)
            .await;

        let (digest, size) = match written {
            Ok(written) => written,
            Err(error) => {
                self.staging.discard(&staged).await;
                return Err(error.into());
            }
        };

        let pushed = self
            .push_file(&Self::manifest_path(name, reference), &staged)
            .await;
        self.staging.discard(&staged).await;
        pushed?;

        tracing::info!(%digest, size, "stored manifest");
        Ok(digest)
    }

    /// Locate a blob for serving. `None` if it does not exist.
    pub async fn fetch_blob(&self, digest: &Digest) -> RegistryResult<Option<Fetched>> {
        self.fetch(&Self::blob_path(digest)).await
    }

    /// Locate a manifest for serving. `None` if it does not exist.
    pub async fn fetch_manifest(
        &self,
        name: &str,
        reference: &str,
    ) -> RegistryResult<Option<Fetched>> {
        self.fetch(&Self::manifest_path(name, reference)).await
    }

    /// Resolve an object to a local file, open it, and digest and measure
    /// that open handle.
    ///
    /// Backends which keep objects on disk hand out the object file itself;
    /// otherwise the object is downloaded into the staging area. The served
    /// bytes always come from the same handle the digest was computed over.
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, remote: &Utf8Path) -> RegistryResult<Option<Fetched>> {
        self.ensure_namespace().await?;

        let (path, temporary) = match self.bucket.local_file(remote).await {
            Ok(Some(path)) => (path, false),
            Ok(None) => {
                let path = self.staging.read_path();
                if let Err(error) = self.bucket.download_file(remote, &path).await {
                    self.staging.discard(&path).await;
                    return not_found_as_none(error);
                }
                (path, true)
            }
            Err(error) => return not_found_as_none(error),
        };

        let copy = LocalCopy {
            staging: self.staging.clone(),
            path,
            temporary,
        };

        match copy.open().await {
            Ok((file, digest, length)) => Ok(Some(Fetched {
                copy,
                file,
                digest,
                length,
            })),
            Err(error) => {
                copy.release().await;
                Err(error)
            }
        }
    }
}

fn not_found_as_none<T>(error: StorageError) -> RegistryResult<Option<T>> {
    if error.is_not_found() {
        Ok(None)
    } else {
        Err(error.into())
    }
}

#[derive(Debug)]
struct LocalCopy {
    staging: StagingArea,
    path: Utf8PathBuf,
    temporary: bool,
}

impl LocalCopy {
    async fn open(&self) -> RegistryResult<(File, Digest, u64)> {
        let mut file = File::open(&self.path).await?;
        let digest = digest_reader(&mut file).await?;
        let length = file.metadata().await?.len();
        file.rewind().await?;
        Ok((file, digest, length))
    }

    async fn release(self) {
        if self.temporary {
            self.staging.discard(&self.path).await;
        }
    }
}

/// An object resolved to an open local file, with the digest and length of
/// that file's contents.
#[derive(Debug)]
pub struct Fetched {
    copy: LocalCopy,
    file: File,
    digest: Digest,
    length: u64,
}

impl Fetched {
    /// Digest of the file contents.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Length of the file in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The file for serving, positioned at its start. A materialized file is
    /// unlinked, the handle stays readable.
    pub async fn open(self) -> File {
        self.copy.release().await;
        self.file
    }

    /// Give up the file without serving its contents.
    pub async fn release(self) {
        self.copy.release().await;
    }
}
