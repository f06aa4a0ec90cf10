//! The daemon's RPC calls, as JSON over HTTP.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::errors::DaemonResponseExt as _;
use crate::{DaemonClient, DaemonRequestError};

const CREATE_BUCKET: &str = "space.SpaceApi/CreateBucket";
const ADD_ITEMS: &str = "space.SpaceApi/AddItems";
const OPEN_FILE: &str = "space.SpaceApi/OpenFile";

#[derive(Debug, Serialize)]
struct CreateBucketRequest<'r> {
    slug: &'r str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddItemsRequest<'r> {
    bucket: &'r str,
    target_path: &'r str,
    source_paths: [&'r str; 1],
}

/// One progress event from an add. The daemon streams these, one JSON document per line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemsEvent {
    #[serde(default)]
    result: Option<AddItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemResult {
    #[serde(default)]
    source_path: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Serialize)]
struct OpenFileRequest<'r> {
    bucket: &'r str,
    path: &'r str,
}

#[derive(Debug, Deserialize)]
struct OpenFileResponse {
    #[serde(default)]
    location: String,
}

/// Directory inside the bucket an object is added to, e.g. `/manifests/app/`.
pub(crate) fn target_dir(remote: &Utf8Path) -> String {
    match remote.parent().map(|parent| parent.as_str().trim_matches('/')) {
        Some(parent) if !parent.is_empty() => format!("/{parent}/"),
        _ => "/".to_owned(),
    }
}

/// Absolute path of an object inside its bucket.
pub(crate) fn object_path(remote: &Utf8Path) -> String {
    format!("/{}", remote.as_str().trim_start_matches('/'))
}

impl DaemonClient {
    async fn call<B: Serialize>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<http::Response<hyperdriver::Body>, DaemonRequestError> {
        let uri = self.endpoint_uri(method)?;
        tracing::trace!("POST {}", uri);

        let body = serde_json::to_vec(body)
            .map_err(|err| DaemonRequestError::Serde(err, method.to_owned()))?;
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::AUTHORIZATION, self.token.app_token()?)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(hyperdriver::Body::from(body))?;

        self.execute(request).await
    }

    /// Create a bucket. One which already exists counts as created.
    #[tracing::instrument(level = "trace", skip(self))]
    pub(crate) async fn create_bucket(&self, slug: &str) -> Result<(), DaemonRequestError> {
        let response = self.call(CREATE_BUCKET, &CreateBucketRequest { slug }).await?;
        match response.body_bytes().await {
            Ok(_) => tracing::debug!(bucket = slug, "Created bucket"),
            Err(DaemonRequestError::Daemon(err)) if err.status_code() == http::StatusCode::CONFLICT => {
                tracing::debug!(bucket = slug, "Bucket already exists")
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Hand a local file to the daemon, which stores it under `target` with
    /// the file's own name.
    #[tracing::instrument(level = "trace", skip(self))]
    pub(crate) async fn add_item(
        &self,
        bucket: &str,
        target: &str,
        source: &Utf8Path,
    ) -> Result<(), DaemonRequestError> {
        let request = AddItemsRequest {
            bucket,
            target_path: target,
            source_paths: [source.as_str()],
        };
        let body = self.call(ADD_ITEMS, &request).await?.body_bytes().await?;

        for line in body.split(|byte| *byte == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let event: AddItemsEvent = serde_json::from_slice(line).map_err(|err| {
                DaemonRequestError::Serde(err, String::from_utf8_lossy(line).into_owned())
            })?;
            if let Some(result) = event.result.filter(|result| !result.error.is_empty()) {
                return Err(DaemonRequestError::Item {
                    path: result.source_path,
                    message: result.error,
                });
            }
        }
        Ok(())
    }

    /// Ask the daemon for a local copy of an object.
    #[tracing::instrument(level = "trace", skip(self))]
    pub(crate) async fn open_file(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<Utf8PathBuf, DaemonRequestError> {
        let response: OpenFileResponse = self
            .call(OPEN_FILE, &OpenFileRequest { bucket, path })
            .await?
            .deserialize()
            .await?;

        if response.location.is_empty() {
            return Err(DaemonRequestError::MissingLocation(path.to_owned()));
        }
        Ok(Utf8PathBuf::from(response.location))
    }
}
