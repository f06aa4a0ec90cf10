use std::sync::Arc;
use std::{fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{errors::BucketResponseExt, BucketClient, BucketRequestError};

/// Endpoint which gets or creates a bucket by name.
const BUCKET_CREATE_ENDPOINT: &str = "buckets";

/// Service-assigned key addressing a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BucketKey(Arc<str>);

impl BucketKey {
    /// Create a bucket key.
    pub fn new<S>(key: S) -> Self
    where
        S: Into<String>,
    {
        BucketKey(Arc::from(key.into()))
    }
}

impl From<String> for BucketKey {
    fn from(value: String) -> Self {
        BucketKey(value.into())
    }
}

impl From<BucketKey> for String {
    fn from(value: BucketKey) -> Self {
        value.0.deref().to_owned()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for BucketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateBucketBody<'b> {
    name: &'b str,
    encrypted: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateBucketResponse {
    key: BucketKey,
    #[allow(unused)]
    name: String,
}

impl BucketClient {
    /// Resolve the key for a bucket, creating the bucket on first use.
    ///
    /// Racing callers for the same name share a single request. A failed
    /// lookup is not cached, so the next caller tries again.
    #[tracing::instrument(skip(self))]
    pub async fn get_bucket(&self, name: &str) -> Result<BucketKey, BucketRequestError> {
        let cell = if let Some(cell) = { self.buckets.get(name).map(|r| r.value().clone()) } {
            cell
        } else {
            self.buckets
                .entry(name.into())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value()
                .clone()
        };

        cell.get_or_try_init(|| self.create_bucket(name))
            .await
            .cloned()
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub(crate) async fn create_bucket(&self, name: &str) -> Result<BucketKey, BucketRequestError> {
        let body = CreateBucketBody {
            name,
            encrypted: self.encrypted,
        };
        tracing::trace!("body: {body:?}");

        let uri = self.endpoint_uri(BUCKET_CREATE_ENDPOINT)?;
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(uri.clone())
            .header(http::header::AUTHORIZATION, self.token.bearer()?)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(hyperdriver::Body::from(bytes::Bytes::from(
                serde_json::to_vec(&body).map_err(|err| {
                    BucketRequestError::Serde(err, format!("create bucket {name}"))
                })?,
            )))?;

        let response: CreateBucketResponse = self.execute(request).await?.deserialize(&uri).await?;
        tracing::debug!(bucket = name, key = %response.key, "Resolved bucket");
        Ok(response.key)
    }
}
