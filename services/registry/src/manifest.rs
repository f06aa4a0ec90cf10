//! Manifest operations for the registry

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio_util::io::ReaderStream;

use crate::api::{DOCKER_CONTENT_DIGEST, header_value, validate_name, validate_reference};
use crate::error::{RegistryError, RegistryResult};
use crate::storage::{Fetched, RegistryStorage};

/// Media type served for every manifest.
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Router for manifest operations
pub fn router() -> Router<RegistryStorage> {
    Router::new().route(
        "/v2/{name}/manifests/{reference}",
        get(get_manifest).head(head_manifest).put(put_manifest),
    )
}

async fn find_manifest(
    storage: &RegistryStorage,
    name: String,
    reference: String,
) -> RegistryResult<Fetched> {
    validate_name(&name)?;
    validate_reference(&reference)?;

    match storage.fetch_manifest(&name, &reference).await? {
        Some(object) => Ok(object),
        None => Err(RegistryError::ManifestNotFound { name, reference }),
    }
}

fn manifest_headers(object: &Fetched) -> RegistryResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(MANIFEST_V2_MEDIA_TYPE),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.length()));
    headers.insert(DOCKER_CONTENT_DIGEST, header_value(object.digest())?);
    Ok(headers)
}

/// Get a manifest
#[tracing::instrument(skip(storage))]
async fn get_manifest(
    State(storage): State<RegistryStorage>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let object = find_manifest(&storage, name, reference).await?;
    let headers = match manifest_headers(&object) {
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

/// Check if a manifest exists
#[tracing::instrument(skip(storage))]
async fn head_manifest(
    State(storage): State<RegistryStorage>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let object = find_manifest(&storage, name, reference).await?;
    let headers = manifest_headers(&object);
    object.release().await;
    Ok((StatusCode::OK, headers?).into_response())
}

/// Upload a manifest
#[tracing::instrument(skip(storage, body))]
async fn put_manifest(
    State(storage): State<RegistryStorage>,
    Path((name, reference)): Path<(String, String)>,
    body: Body,
) -> RegistryResult<Response> {
    validate_name(&name)?;
    validate_reference(&reference)?;

    let digest = storage
        .push_manifest(&name, &reference, body.into_data_stream())
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        header_value(format!("/v2/{name}/manifests/{reference}"))?,
    );
    headers.insert(DOCKER_CONTENT_DIGEST, header_value(&digest)?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
    Ok((StatusCode::CREATED, headers).into_response())
}
