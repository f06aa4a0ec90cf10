//! Core client for accessing objects in a bucket service using the storage driver API.

use std::sync::Arc;

use camino::Utf8Path;
use dashmap::DashMap;
use bytes::Bytes;
use eyre::Context;
use futures::channel::mpsc;
use futures::{SinkExt as _, StreamExt as _, TryStreamExt as _};
use http::Uri;
use http_body_util::BodyExt as _;
use hyperdriver::Body;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tokio::io::{self, AsyncWriteExt as _};
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tower::ServiceExt as _;

use storage_driver::{Credential, Driver, Reader, StorageError, StorageErrorKind, Writer};

use crate::errors::BucketResponseExt as _;
use crate::{BucketKey, BucketRequestError, BucketServiceConfig};

use super::BUCKET_STORAGE_NAME;

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

type ArcLockMap<K, V> = Arc<DashMap<K, V>>;

/// API client for a bucket service, authenticated with a single bearer credential.
///
/// Bucket keys are resolved once per bucket name and shared between clones.
#[derive(Debug, Clone)]
pub struct BucketClient {
    client: hyperdriver::client::SharedClientService<Body, Body>,
    endpoint: Uri,
    pub(crate) token: Credential,
    pub(crate) encrypted: bool,
    pub(crate) buckets: ArcLockMap<String, Arc<OnceCell<BucketKey>>>,
}

impl BucketClient {
    /// Create a client for the configured service.
    pub fn new(config: BucketServiceConfig) -> Self {
        let mut builder = hyperdriver::Client::build_tcp_http();
        let tcp = builder.transport();

        tcp.config_mut().connect_timeout = Some(crate::BUCKET_DEFAULT_CONNECT_TIMEOUT);

        let client = builder
            .with_default_tls()
            .with_timeout(crate::BUCKET_DEFAULT_TIMEOUT)
            .build_service();

        Self::from_client(client, config)
    }

    pub(crate) fn from_client(
        client: hyperdriver::client::SharedClientService<Body, Body>,
        config: BucketServiceConfig,
    ) -> Self {
        BucketClient {
            client,
            endpoint: config.endpoint,
            token: config.token,
            encrypted: config.encrypted,
            buckets: Default::default(),
        }
    }

    /// The service endpoint.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    pub(crate) fn endpoint_uri(&self, path: &str) -> Result<Uri, BucketRequestError> {
        let base = self.endpoint.to_string();
        let uri = format!("{}/{}", base.trim_end_matches('/'), path)
            .parse()
            .map_err(http::Error::from)?;
        Ok(uri)
    }

    fn object_uri(&self, key: &BucketKey, remote: &Utf8Path) -> Result<Uri, BucketRequestError> {
        let path = remote
            .as_str()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let key = utf8_percent_encode(key.as_ref(), PATH_SEGMENT);
        self.endpoint_uri(&format!("buckets/{key}/paths/{path}"))
    }

    pub(crate) async fn execute(
        &self,
        request: http::Request<hyperdriver::Body>,
    ) -> Result<http::Response<hyperdriver::Body>, BucketRequestError> {
        let response = self.client.clone().oneshot(request).await?;
        Ok(response)
    }

    /// Stream `body` to the object. Without a `length` the body is sent chunked.
    #[tracing::instrument(level = "trace", skip(self, body, key), fields(bucket=%key, size=?length))]
    pub(crate) async fn put_object(
        &self,
        key: &BucketKey,
        remote: &Utf8Path,
        body: Body,
        length: Option<u64>,
    ) -> Result<(), BucketRequestError> {
        let uri = self.object_uri(key, remote)?;
        tracing::trace!("PUT {}", uri);

        let mut request = http::Request::builder()
            .method(http::Method::PUT)
            .uri(uri.clone())
            .header(http::header::AUTHORIZATION, self.token.bearer()?)
            .header(http::header::CONTENT_TYPE, "application/octet-stream");
        if let Some(length) = length {
            request = request.header(http::header::CONTENT_LENGTH, length);
        }
        let request = request.body(body)?;

        self.execute(request).await?.handle_errors(&uri).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, key), fields(bucket=%key))]
    pub(crate) async fn get_object(
        &self,
        key: &BucketKey,
        remote: &Utf8Path,
    ) -> Result<http::Response<hyperdriver::Body>, BucketRequestError> {
        let uri = self.object_uri(key, remote)?;
        tracing::trace!("GET {}", uri);

        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(uri.clone())
            .header(http::header::AUTHORIZATION, self.token.bearer()?)
            .body(Body::empty())?;

        self.execute(request).await?.handle_errors(&uri).await
    }

    async fn resolve(&self, bucket: &str) -> Result<BucketKey, StorageError> {
        self.get_bucket(bucket)
            .await
            .map_err(|err| err.into_storage(bucket, format!("get {bucket} key")))
    }

    async fn push(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        body: Body,
        length: Option<u64>,
    ) -> Result<(), StorageError> {
        let key = self.resolve(bucket).await?;
        self.put_object(&key, remote, body, length)
            .await
            .map_err(|err| err.into_storage(bucket, format!("upload to {bucket}:{remote}")))?;

        tracing::debug!(%remote, "Uploaded object");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for BucketClient {
    fn name(&self) -> &'static str {
        BUCKET_STORAGE_NAME
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.resolve(bucket).await?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        // The request body must be 'static, so chunks are handed over a
        // channel while the borrowed reader is drained alongside the request.
        let (mut sender, receiver) = mpsc::channel::<io::Result<Bytes>>(crate::BUCKET_UPLOAD_QUEUE);
        let body = Body::from(axum::body::Body::from_stream(receiver));

        let feed = async move {
            let mut chunks = ReaderStream::new(local);
            while let Some(chunk) = chunks.next().await {
                let failed = chunk.is_err();
                if sender.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        };

        let ((), pushed) = futures::future::join(feed, self.push(bucket, remote, body, None)).await;
        pushed
    }

    async fn upload_file(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StorageError> {
        tracing::trace!(%remote, %local, "Uploading from file: {local}");
        let file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("open {local}"))
            .map_err(StorageError::with(BUCKET_STORAGE_NAME, StorageErrorKind::Io))?;
        let length = file
            .metadata()
            .await
            .with_context(|| format!("stat {local}"))
            .map_err(StorageError::with(BUCKET_STORAGE_NAME, StorageErrorKind::Io))?
            .len();

        let body = Body::from(axum::body::Body::from_stream(ReaderStream::new(file)));
        self.push(bucket, remote, body, Some(length)).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let key = self.resolve(bucket).await?;
        let response = self
            .get_object(&key, remote)
            .await
            .map_err(|err| err.into_storage(bucket, format!("download from {bucket}:{remote}")))?;

        let stream = response
            .into_body()
            .into_data_stream()
            .map_err(io::Error::other);
        let mut src = tokio_util::io::StreamReader::new(stream);

        tokio::io::copy(&mut src, local)
            .await
            .context("copy response body to download stream")
            .map_err(StorageError::with(
                BUCKET_STORAGE_NAME,
                StorageErrorKind::ServiceUnavailable,
            ))?;

        local
            .flush()
            .await
            .context("flush download stream")
            .map_err(StorageError::with(BUCKET_STORAGE_NAME, StorageErrorKind::Io))?;

        Ok(())
    }
}
