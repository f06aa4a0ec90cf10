//! Storage driver over the daemon's file based RPC calls.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use eyre::Context;
use http::Uri;
use hyperdriver::Body;
use tokio::io::{self, AsyncWriteExt as _};
use tokio::sync::OnceCell;
use tower::ServiceExt as _;

use storage_driver::{Credential, Driver, Reader, StorageError, StorageErrorKind, Writer};

use crate::rpc::{object_path, target_dir};
use crate::{DaemonConfig, DaemonRequestError, DAEMON_STORAGE_NAME};

/// RPC client for a storage daemon on the local host.
///
/// Buckets are created once per name and shared between clones.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: hyperdriver::client::SharedClientService<Body, Body>,
    endpoint: Uri,
    pub(crate) token: Credential,
    scratch: Utf8PathBuf,
    buckets: Arc<DashMap<String, Arc<OnceCell<()>>>>,
}

impl DaemonClient {
    /// Create a client for the configured daemon.
    pub fn new(config: DaemonConfig) -> Self {
        let mut builder = hyperdriver::Client::build_tcp_http();
        let tcp = builder.transport();

        tcp.config_mut().connect_timeout = Some(crate::DAEMON_DEFAULT_CONNECT_TIMEOUT);

        let client = builder
            .without_tls()
            .with_timeout(crate::DAEMON_DEFAULT_TIMEOUT)
            .build_service();

        Self::from_client(client, config)
    }

    pub(crate) fn from_client(
        client: hyperdriver::client::SharedClientService<Body, Body>,
        config: DaemonConfig,
    ) -> Self {
        DaemonClient {
            client,
            scratch: config.scratch_dir(),
            endpoint: config.endpoint,
            token: config.token,
            buckets: Default::default(),
        }
    }

    /// The daemon endpoint.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    pub(crate) fn endpoint_uri(&self, path: &str) -> Result<Uri, DaemonRequestError> {
        let base = self.endpoint.to_string();
        let uri = format!("{}/{}", base.trim_end_matches('/'), path)
            .parse()
            .map_err(http::Error::from)?;
        Ok(uri)
    }

    pub(crate) async fn execute(
        &self,
        request: http::Request<hyperdriver::Body>,
    ) -> Result<http::Response<hyperdriver::Body>, DaemonRequestError> {
        let response = self.client.clone().oneshot(request).await?;
        Ok(response)
    }

    /// Create the bucket on first use. A failure is not cached.
    #[tracing::instrument(skip(self))]
    pub async fn ensure(&self, bucket: &str) -> Result<(), DaemonRequestError> {
        let cell = self
            .buckets
            .entry(bucket.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        cell.get_or_try_init(|| self.create_bucket(bucket)).await?;
        Ok(())
    }

    async fn prepare(&self, bucket: &str) -> Result<(), StorageError> {
        self.ensure(bucket)
            .await
            .map_err(|err| err.into_storage(bucket, format!("create bucket {bucket}")))
    }

    /// Push a file whose name already matches the object's name.
    async fn push_path(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.prepare(bucket).await?;
        self.add_item(bucket, &target_dir(remote), local)
            .await
            .map_err(|err| err.into_storage(bucket, format!("add {local} as {remote}")))?;

        tracing::debug!(%remote, %local, "Added object");
        Ok(())
    }

    /// A fresh scratch directory and the path an upload of `remote` takes in it.
    fn scratch_for(&self, remote: &Utf8Path) -> Result<(Utf8PathBuf, Utf8PathBuf), StorageError> {
        let name = remote.file_name().ok_or_else(|| {
            StorageError::builder(
                DAEMON_STORAGE_NAME,
                StorageErrorKind::InvalidRequest,
                format!("no file name in {remote}"),
            )
            .path(remote.as_str())
            .build()
        })?;
        let dir = self.scratch.join(uuid::Uuid::new_v4().to_string());
        let path = dir.join(name);
        Ok((dir, path))
    }

    async fn discard_scratch(&self, dir: &Utf8Path) {
        if let Err(error) = tokio::fs::remove_dir_all(dir).await {
            if error.kind() != io::ErrorKind::NotFound {
                tracing::warn!(%dir, "failed to remove scratch directory: {error}");
            }
        }
    }

    /// Local path of the daemon's copy of an object.
    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        self.prepare(bucket).await?;
        let location = self
            .open_file(bucket, &object_path(remote))
            .await
            .map_err(|err| err.into_storage(bucket, format!("open {remote}")))?;

        tokio::fs::metadata(&location)
            .await
            .map_err(|err| DaemonRequestError::Io(err).into_storage(bucket, format!("stat {location}")))?;
        Ok(location)
    }
}

fn io_error(context: String) -> impl FnOnce(io::Error) -> StorageError {
    move |error| {
        StorageError::builder(DAEMON_STORAGE_NAME, StorageErrorKind::from_io(&error), error)
            .context(context)
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for DaemonClient {
    fn name(&self) -> &'static str {
        DAEMON_STORAGE_NAME
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.prepare(bucket).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let (dir, staged) = self.scratch_for(remote)?;

        let result = async {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(io_error(format!("create {dir}")))?;
            let mut file = tokio::fs::File::create(&staged)
                .await
                .map_err(io_error(format!("create {staged}")))?;
            io::copy_buf(local, &mut file)
                .await
                .map_err(io_error(format!("write {staged}")))?;
            file.flush()
                .await
                .map_err(io_error(format!("flush {staged}")))?;
            drop(file);

            self.push_path(bucket, remote, &staged).await
        }
        .await;

        self.discard_scratch(&dir).await;
        result
    }

    async fn upload_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        if local.file_name().is_some() && local.file_name() == remote.file_name() {
            return self.push_path(bucket, remote, local).await;
        }

        tracing::trace!(%remote, %local, "Copying to scratch before adding");
        let (dir, staged) = self.scratch_for(remote)?;
        let result = async {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(io_error(format!("create {dir}")))?;
            tokio::fs::copy(local, &staged)
                .await
                .map_err(io_error(format!("copy {local}")))?;
            self.push_path(bucket, remote, &staged).await
        }
        .await;

        self.discard_scratch(&dir).await;
        result
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let location = self.open(bucket, remote).await?;
        let mut file = tokio::fs::File::open(&location)
            .await
            .map_err(io_error(format!("open {location}")))?;

        io::copy(&mut file, local)
            .await
            .context("copy daemon file to download stream")
            .map_err(StorageError::with(DAEMON_STORAGE_NAME, StorageErrorKind::Io))?;

        local
            .flush()
            .await
            .context("flush download stream")
            .map_err(StorageError::with(DAEMON_STORAGE_NAME, StorageErrorKind::Io))?;
        Ok(())
    }

    async fn local_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Option<Utf8PathBuf>, StorageError> {
        self.open(bucket, remote).await.map(Some)
    }
}
