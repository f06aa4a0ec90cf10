//! Blob operations for the registry

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::api::{DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID, header_value, validate_name};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::storage::{Fetched, RegistryStorage};

/// Router for blob operations
pub fn router() -> Router<RegistryStorage> {
    Router::new()
        .route("/v2/{name}/blobs/{digest}", get(get_blob).head(head_blob))
        .route("/v2/{name}/blobs/uploads/", post(start_blob_upload))
        .route(
            "/v2/{name}/blobs/uploads/{uuid}",
            get(upload_status)
                .patch(upload_chunk)
                .put(complete_blob_upload),
        )
}

fn blob_headers(object: &Fetched) -> RegistryResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.length()));
    headers.insert(DOCKER_CONTENT_DIGEST, header_value(object.digest())?);
    Ok(headers)
}

async fn find_blob(
    storage: &RegistryStorage,
    name: &str,
    digest: &str,
) -> RegistryResult<Fetched> {
    validate_name(name)?;
    // Only sha256 blobs are ever stored, anything else cannot exist.
    let Ok(parsed) = Digest::parse(digest) else {
        return Err(RegistryError::BlobNotFound(digest.to_owned()));
    };
    storage
        .fetch_blob(&parsed)
        .await?
        .ok_or_else(|| RegistryError::BlobNotFound(digest.to_owned()))
}

/// Get a blob
#[tracing::instrument(skip(storage))]
async fn get_blob(
    State(storage): State<RegistryStorage>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let object = find_blob(&storage, &name, &digest).await?;
    let headers = match blob_headers(&object) {
        Ok(headers) => headers,
        Err(error) => {
            object.release().await;
            return Err(error);
        }
    };

    let file = object.open().await;
    Ok((
        StatusCode::OK,
        headers,
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Check if a blob exists
#[tracing::instrument(skip(storage))]
async fn head_blob(
    State(storage): State<RegistryStorage>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let object = find_blob(&storage, &name, &digest).await?;
    let headers = blob_headers(&object);
    object.release().await;
    Ok((StatusCode::OK, headers?).into_response())
}

fn upload_location(name: &str, id: &Uuid) -> String {
    format!("/v2/{name}/blobs/uploads/{id}")
}

fn upload_headers(name: &str, id: &Uuid, range: String) -> RegistryResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, header_value(upload_location(name, id))?);
    headers.insert(header::RANGE, header_value(range)?);
    headers.insert(DOCKER_UPLOAD_UUID, header_value(id)?);
    Ok(headers)
}

/// Start a blob upload session
#[tracing::instrument(skip(storage))]
async fn start_blob_upload(
    State(storage): State<RegistryStorage>,
    Path(name): Path<String>,
) -> RegistryResult<Response> {
    validate_name(&name)?;

    let id = storage.sessions().create();
    let mut headers = upload_headers(&name, &id, "0-0".to_owned())?;
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));

    tracing::debug!(%id, "started upload");
    Ok((StatusCode::ACCEPTED, headers).into_response())
}

/// Report the progress of an upload session
#[tracing::instrument(skip(storage))]
async fn upload_status(
    State(storage): State<RegistryStorage>,
    Path((name, uuid)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_name(&name)?;

    let (id, offset) = Uuid::parse_str(&uuid)
        .ok()
        .and_then(|id| storage.sessions().offset(&id).map(|offset| (id, offset)))
        .ok_or(RegistryError::UploadNotFound(uuid))?;

    let headers = upload_headers(&name, &id, format!("0-{offset}"))?;
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

fn upload_session(uuid: &str) -> RegistryResult<Uuid> {
    Uuid::parse_str(uuid).map_err(|_| RegistryError::UnknownUploadSession(uuid.to_owned()))
}

/// Append a chunk to an upload session
#[tracing::instrument(skip(storage, body))]
async fn upload_chunk(
    State(storage): State<RegistryStorage>,
    Path((name, uuid)): Path<(String, String)>,
    body: Body,
) -> RegistryResult<Response> {
    validate_name(&name)?;
    let id = upload_session(&uuid)?;

    let range = storage.append_chunk(&id, body.into_data_stream()).await?;

    let mut headers = upload_headers(&name, &id, range.to_string())?;
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
    Ok((StatusCode::ACCEPTED, headers).into_response())
}

#[derive(Debug, Deserialize)]
struct CommitQuery {
    digest: Option<String>,
}

/// Complete a blob upload
#[tracing::instrument(skip(storage, body))]
async fn complete_blob_upload(
    State(storage): State<RegistryStorage>,
    Path((name, uuid)): Path<(String, String)>,
    Query(query): Query<CommitQuery>,
    body: Body,
) -> RegistryResult<Response> {
    validate_name(&name)?;
    let id = upload_session(&uuid)?;

    let declared = query
        .digest
        .as_deref()
        .ok_or(RegistryError::MissingDigest)
        .and_then(|digest| Digest::parse(digest).map_err(RegistryError::from));
    let digest = match declared {
        Ok(digest) => digest,
        Err(error) => {
            storage.abandon_upload(&id).await;
            return Err(error);
        }
    };

    storage
        .commit_blob(&id, &digest, body.into_data_stream())
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        header_value(format!("/v2/{name}/blobs/{digest}"))?,
    );
    headers.insert(DOCKER_CONTENT_DIGEST, header_value(&digest)?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
    Ok((StatusCode::CREATED, headers).into_response())
}
