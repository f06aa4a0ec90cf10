use std::error::Error as StdError;
use std::fmt;
use std::io;

use tracing_error::SpanTrace;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// What went wrong, independent of the backend.
///
/// The registry only distinguishes [`StorageErrorKind::NotFound`] from
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The object or bucket does not exist.
    NotFound,

    /// The credential was rejected.
    PermissionDenied,

    /// Local disk or pipe failure.
    Io,

    /// The backend could not be reached, or answered with a server error.
    ServiceUnavailable,

    /// The backend rejected the request.
    InvalidRequest,

    /// Anything else.
    Other,
}

impl StorageErrorKind {
    /// Pick the kind matching a local I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::PermissionDenied => "permission denied",
            StorageErrorKind::Io => "I/O error",
            StorageErrorKind::ServiceUnavailable => "service unavailable",
            StorageErrorKind::InvalidRequest => "invalid request",
            StorageErrorKind::Other => "other error",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed storage operation, with the object it concerned and the span it
/// happened in.
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "local",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
/// )
///     .bucket("ddocker")
///     .path("blobs/sha256:00")
///     .build();
///
/// assert!(error.is_not_found());
/// assert_eq!(error.bucket(), Some("ddocker"));
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
    source: BoxError,
    span_trace: SpanTrace,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// An error with no bucket or path attached.
    pub fn new<E: Into<BoxError>>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self {
        Self::builder(engine, kind, error).build()
    }

    /// An error from a local I/O failure, keeping its kind.
    pub fn io(engine: &'static str, error: io::Error) -> Self {
        Self::new(engine, StorageErrorKind::from_io(&error), error)
    }

    /// Start an error which carries a bucket, path or context.
    pub fn builder<E: Into<BoxError>>(
        engine: &'static str,
        kind: StorageErrorKind,
        error: E,
    ) -> StorageErrorBuilder {
        StorageErrorBuilder {
            error: StorageError {
                kind,
                engine,
                bucket: None,
                path: None,
                context: None,
                source: error.into(),
                span_trace: SpanTrace::new(tracing::Span::none()),
            },
        }
    }

    /// A `map_err` adaptor.
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// fn operation() -> Result<(), StorageError> {
    ///     std::fs::File::open("file.txt")
    ///         .map_err(StorageError::with("local", StorageErrorKind::Io))?;
    ///     Ok(())
    /// }
    /// ```
    pub fn with<E: Into<BoxError>>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync> {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// The error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Whether the object (or its bucket) does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// The bucket name, if known.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// The span trace captured when the error was built.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} storage: {}", self.engine, self.kind)?;
        match (&self.bucket, &self.path) {
            (Some(bucket), Some(path)) => write!(f, " at {bucket}:{path}")?,
            (Some(bucket), None) => write!(f, " in {bucket}")?,
            (None, Some(path)) => write!(f, " at {path}")?,
            (None, None) => {}
        }
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        write!(f, ": {}", self.source)
    }
}

/// Builder for [`StorageError`], created by [`StorageError::builder`].
#[derive(Debug)]
pub struct StorageErrorBuilder {
    error: StorageError,
}

impl StorageErrorBuilder {
    /// Set the bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.error.bucket = Some(bucket.into());
        self
    }

    /// Set the object path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.error.path = Some(path.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.error.context = Some(context.into());
        self
    }

    /// Finish the error, capturing the current span.
    pub fn build(mut self) -> StorageError {
        self.error.span_trace = SpanTrace::capture();
        self.error
    }
}
