//! Error types for the registry

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use storage::StorageError;

use crate::digest::{Digest, DigestError};
use crate::session::UnknownUploadSession;
use crate::staging::StagingError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Body of the 404 response for an unknown manifest, as registry clients expect it.
pub(crate) const MANIFEST_UNKNOWN_BODY: &str =
    r#"{"errors": [{"code": "MANIFEST_UNKNOWN", "message": "MANIFEST_UNKNOWN"}]}"#;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found, or not addressable by a stored digest
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found
    #[error("manifest not found: {name}:{reference}")]
    ManifestNotFound {
        /// Repository name
        name: String,
        /// Tag or digest
        reference: String,
    },

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// The commit request did not declare a digest
    #[error("missing digest query parameter")]
    MissingDigest,

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidName(String),

    /// Invalid manifest reference
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Upload status requested for a session which does not exist
    #[error("upload not found: {0}")]
    UploadNotFound(String),

    /// Chunk or commit for a session which does not exist
    #[error("unknown upload session: {0}")]
    UnknownUploadSession(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: Digest,
        /// Actual digest
        actual: Digest,
    },

    /// A response header could not be encoded
    #[error("invalid header value")]
    Header(#[from] axum::http::header::InvalidHeaderValue),

    /// Digest computation failed
    #[error("digest: {0}")]
    Digest(#[source] DigestError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Staging area error
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DigestError> for RegistryError {
    fn from(value: DigestError) -> Self {
        match value {
            DigestError::Invalid(digest) => RegistryError::InvalidDigest(digest),
            error => RegistryError::Digest(error),
        }
    }
}

impl From<UnknownUploadSession> for RegistryError {
    fn from(value: UnknownUploadSession) -> Self {
        RegistryError::UnknownUploadSession(value.0.to_string())
    }
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound { .. }
            | RegistryError::UploadNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidName(_) | RegistryError::InvalidReference(_) => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::InvalidDigest(_)
            | RegistryError::MissingDigest
            | RegistryError::UnknownUploadSession(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::Header(_)
            | RegistryError::Digest(_)
            | RegistryError::Storage(_)
            | RegistryError::Staging(_)
            | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        match self {
            RegistryError::ManifestNotFound { .. } => (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                MANIFEST_UNKNOWN_BODY,
            )
                .into_response(),
            _ => status.into_response(),
        }
    }
}
