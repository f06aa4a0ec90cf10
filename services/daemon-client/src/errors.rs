use http::StatusCode;
use http_body_util::BodyExt as _;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use storage_driver::{StorageError, StorageErrorKind};

use crate::DAEMON_STORAGE_NAME;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An RPC call the daemon answered with an error status.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct DaemonError {
    status: StatusCode,
    message: String,
}

impl DaemonError {
    pub(crate) fn from_body(status: StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<RawErrorInfo>(body)
            .ok()
            .and_then(|info| info.message)
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        DaemonError { status, message }
    }

    /// The HTTP status code of the response.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// The message the daemon sent.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Deserialize)]
struct RawErrorInfo {
    #[serde(default, alias = "error")]
    message: Option<String>,
}

/// A failed RPC call to the storage daemon.
#[derive(Debug, Error)]
pub enum DaemonRequestError {
    /// The daemon rejected the call.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// The daemon accepted an add, then failed to store one of the files.
    #[error("adding {path}: {message}")]
    Item {
        /// Source path of the file.
        path: String,
        /// What the daemon reported.
        message: String,
    },

    /// The daemon opened an object without telling us where it is.
    #[error("no local location for {0}")]
    MissingLocation(String),

    /// A response could not be decoded.
    #[error("deserializing: {0} {1}")]
    Serde(#[source] serde_json::Error, String),

    /// Local file handling failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The response body could not be read.
    #[error("body: {0}")]
    Body(#[source] BoxError),

    /// The daemon could not be reached.
    #[error("client: {0}")]
    Client(#[from] hyperdriver::client::Error),

    /// The request could not be constructed.
    #[error("request: {0}")]
    Request(#[from] http::Error),

    /// The token is not a valid header value.
    #[error("token is not a valid header value")]
    Credential(#[from] http::header::InvalidHeaderValue),
}

impl DaemonRequestError {
    /// The storage error kind this failure corresponds to.
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            DaemonRequestError::Daemon(err) => match err.status_code() {
                StatusCode::NOT_FOUND => StorageErrorKind::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    StorageErrorKind::PermissionDenied
                }
                status if status.is_server_error() => StorageErrorKind::ServiceUnavailable,
                _ => StorageErrorKind::InvalidRequest,
            },
            DaemonRequestError::MissingLocation(_) => StorageErrorKind::NotFound,
            DaemonRequestError::Item { .. }
            | DaemonRequestError::Client(_)
            | DaemonRequestError::Body(_) => StorageErrorKind::ServiceUnavailable,
            DaemonRequestError::Io(err) => StorageErrorKind::from_io(err),
            DaemonRequestError::Request(_) | DaemonRequestError::Credential(_) => {
                StorageErrorKind::InvalidRequest
            }
            DaemonRequestError::Serde(_, _) => StorageErrorKind::Other,
        }
    }

    pub(crate) fn into_storage(self, bucket: &str, context: String) -> StorageError {
        StorageError::builder(DAEMON_STORAGE_NAME, self.kind(), self)
            .bucket(bucket)
            .context(context)
            .build()
    }
}

#[async_trait::async_trait]
pub(crate) trait DaemonResponseExt {
    async fn body_bytes(self) -> Result<bytes::Bytes, DaemonRequestError>;
    async fn deserialize<D: DeserializeOwned>(self) -> Result<D, DaemonRequestError>;
}

#[async_trait::async_trait]
impl DaemonResponseExt for http::Response<hyperdriver::Body> {
    async fn body_bytes(self) -> Result<bytes::Bytes, DaemonRequestError> {
        let status = self.status();
        let body = self
            .into_body()
            .collect()
            .await
            .map_err(|error| DaemonRequestError::Body(error.into()))?
            .to_bytes();

        if status.is_success() {
            Ok(body)
        } else {
            Err(DaemonError::from_body(status, &body).into())
        }
    }

    async fn deserialize<D: DeserializeOwned>(self) -> Result<D, DaemonRequestError> {
        let body = self.body_bytes().await?;
        serde_json::from_slice(&body).map_err(|err| {
            DaemonRequestError::Serde(err, String::from_utf8_lossy(&body).into_owned())
        })
    }
}
