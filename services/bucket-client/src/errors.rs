use http::StatusCode;
use http_body_util::BodyExt as _;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use storage_driver::{StorageError, StorageErrorKind};

use crate::BUCKET_STORAGE_NAME;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error reported by the bucket service.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message} ({code})")]
pub struct BucketError {
    status: StatusCode,
    code: String,
    message: String,
}

impl BucketError {
    /// Decode an error body, falling back to the raw text when the service did
    /// not answer with `{"code", "message"}`.
    pub(crate) fn from_body(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<RawErrorInfo>(body) {
            Ok(info) => BucketError {
                status,
                code: info.code,
                message: info.message,
            },
            Err(_) => BucketError {
                status,
                code: status
                    .canonical_reason()
                    .unwrap_or("unknown")
                    .to_ascii_lowercase()
                    .replace(' ', "_"),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    /// The HTTP status code of the response.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// The error code returned by the service.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The error message returned by the service.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawErrorInfo {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// An error that occurred while making a request to the bucket service.
///
/// This can include errors from the service itself, as well as errors from the
/// client or the network.
#[derive(Debug, Error)]
pub enum BucketRequestError {
    /// An error returned by the bucket service.
    #[error(transparent)]
    Bucket(#[from] BucketError),

    /// An error deserializing a response from the bucket service.
    #[error("deserializing: {0} {1}")]
    Serde(#[source] serde_json::Error, String),

    /// An io error occurred, probably while reading a local source.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred while reading the response body.
    #[error("body: {0}")]
    Body(#[source] BoxError),

    /// An error occurred while sending the request.
    #[error("client: {0}")]
    Client(#[from] hyperdriver::client::Error),

    /// The request could not be constructed.
    #[error("request: {0}")]
    Request(#[from] http::Error),

    /// The credential is not a valid header value.
    #[error("credential is not a valid header value")]
    Credential(#[from] http::header::InvalidHeaderValue),
}

impl BucketRequestError {
    /// Get a reference to the bucket service error, if there is one.
    pub fn bucket(&self) -> Option<&BucketError> {
        match self {
            BucketRequestError::Bucket(err) => Some(err),
            _ => None,
        }
    }

    /// The storage error kind this failure corresponds to.
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            BucketRequestError::Bucket(err) => match err.status_code() {
                StatusCode::NOT_FOUND => StorageErrorKind::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    StorageErrorKind::PermissionDenied
                }
                status if status.is_server_error() => StorageErrorKind::ServiceUnavailable,
                _ => StorageErrorKind::InvalidRequest,
            },
            BucketRequestError::Client(_) | BucketRequestError::Body(_) => {
                StorageErrorKind::ServiceUnavailable
            }
            BucketRequestError::Io(_) => StorageErrorKind::Io,
            BucketRequestError::Request(_) | BucketRequestError::Credential(_) => {
                StorageErrorKind::InvalidRequest
            }
            BucketRequestError::Serde(_, _) => StorageErrorKind::Other,
        }
    }

    pub(crate) fn into_storage(self, bucket: &str, context: String) -> StorageError {
        StorageError::builder(BUCKET_STORAGE_NAME, self.kind(), self)
            .bucket(bucket)
            .context(context)
            .build()
    }
}

#[async_trait::async_trait]
pub(crate) trait BucketResponseExt {
    async fn deserialize<D: DeserializeOwned>(self, uri: &http::Uri) -> Result<D, BucketRequestError>;
    async fn handle_errors(self, uri: &http::Uri) -> Result<Self, BucketRequestError>
    where
        Self: Sized;
}

#[async_trait::async_trait]
impl BucketResponseExt for http::Response<hyperdriver::Body> {
    async fn handle_errors(self, uri: &http::Uri) -> Result<Self, BucketRequestError> {
        if self.status().is_success() {
            Ok(self)
        } else {
            let status = self.status();
            let body = self
                .into_body()
                .collect()
                .await
                .map_err(|error| BucketRequestError::Body(error.into()))?
                .to_bytes();

            let err = BucketError::from_body(status, &body);
            bucket_response_breadcrumb(&err, uri);
            Err(err.into())
        }
    }

    async fn deserialize<D: DeserializeOwned>(self, uri: &http::Uri) -> Result<D, BucketRequestError> {
        let resp = self.handle_errors(uri).await?;

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|error| BucketRequestError::Body(error.into()))?
            .to_bytes();

        serde_json::from_slice(&body).map_err(|err| {
            BucketRequestError::Serde(err, String::from_utf8_lossy(&body).into_owned())
        })
    }
}

fn bucket_response_breadcrumb(error: &BucketError, url: &http::Uri) {
    use sentry::protocol::{Breadcrumb, Map};

    let breadcrumb = Breadcrumb {
        ty: "http".into(),
        category: Some("request".into()),
        data: {
            let mut map = Map::new();

            map.insert("url".into(), url.to_string().into());
            map.insert("status_code".into(), error.status_code().to_string().into());
            map.insert("code".into(), error.code().into());
            map.insert("message".into(), error.message().into());
            map.insert("service".into(), BUCKET_STORAGE_NAME.into());
            map
        },
        ..Default::default()
    };

    sentry::add_breadcrumb(breadcrumb);
}
