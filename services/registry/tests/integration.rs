//! Integration tests for the registry

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use bucket_registry::{Digest, MANIFEST_V2_MEDIA_TYPE, RegistryBuilder};
use bytes::Bytes;
use camino::Utf8Path;
use storage::{
    Driver, LocalDriver, MemoryStorage, Reader, Storage, StorageError, StorageErrorKind, Writer,
};
use tempfile::TempDir;
use tower::ServiceExt;

/// Memory storage whose pushes and pulls can be switched to fail.
#[derive(Debug, Default)]
struct FlakyDriver {
    inner: MemoryStorage,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
}

impl FlakyDriver {
    fn unavailable(&self, what: &str) -> StorageError {
        StorageError::new(
            self.name(),
            StorageErrorKind::ServiceUnavailable,
            format!("{what} refused"),
        )
    }
}

#[async_trait::async_trait]
impl Driver for FlakyDriver {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.inner.ensure_bucket(bucket).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(self.unavailable("upload"));
        }
        self.inner.upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(self.unavailable("download"));
        }
        self.inner.download(bucket, remote, writer).await
    }
}

struct TestRegistry {
    app: Router,
    staging: TempDir,
}

impl TestRegistry {
    fn new(storage: Storage) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let app = RegistryBuilder::new(storage)
            .bucket("ddocker")
            .staging_dir(Utf8Path::from_path(staging.path()).unwrap())
            .build();
        Self { app, staging }
    }

    /// Whether an upload session still has data in the staging area.
    fn has_staged_upload(&self, location: &str) -> bool {
        let uuid = location.rsplit('/').next().unwrap();
        self.staging.path().join("blobs").join(uuid).exists()
    }

    fn memory() -> Self {
        Self::new(MemoryStorage::new().into())
    }

    fn flaky() -> (Self, Arc<FlakyDriver>) {
        let driver = Arc::new(FlakyDriver::default());
        (Self::new(Storage::new(driver.clone())), driver)
    }

    async fn send(&self, method: &str, uri: &str, body: impl Into<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn start_upload(&self, name: &str) -> String {
        let response = self
            .send("POST", &format!("/v2/{name}/blobs/uploads/"), Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        header_str(&response, header::LOCATION)
    }

    async fn push_blob(&self, name: &str, data: &'static [u8]) -> Digest {
        let location = self.start_upload(name).await;
        let digest = Digest::of(data);
        let response = self
            .send("PUT", &format!("{location}?digest={digest}"), data)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        digest
    }
}

fn header_str(response: &Response<Body>, name: impl header::AsHeaderName) -> String {
    response
        .headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned()
}

async fn body(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test]
async fn liveness() {
    let registry = TestRegistry::memory();

    for uri in ["/", "/v2/"] {
        let response = registry.send("GET", uri, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body(response).await[..], b"ok");
    }
}

#[tokio::test]
async fn chunked_blob_upload() {
    let registry = TestRegistry::memory();

    let response = registry
        .send("POST", "/v2/alpine/blobs/uploads/", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, header::RANGE), "0-0");
    let location = header_str(&response, header::LOCATION);
    let uuid = header_str(&response, "docker-upload-uuid");
    assert_eq!(location, format!("/v2/alpine/blobs/uploads/{uuid}"));

    let response = registry.send("PATCH", &location, "0123456789").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, header::RANGE), "0-10");
    assert_eq!(header_str(&response, header::LOCATION), location);

    let response = registry.send("PATCH", &location, "abcde").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, header::RANGE), "10-15");

    let response = registry.send("GET", &location, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, header::RANGE), "0-15");

    let digest = Digest::of(b"0123456789abcde");
    let response = registry
        .send("PUT", &format!("{location}?digest={digest}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, header::LOCATION),
        format!("/v2/alpine/blobs/{digest}")
    );
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());

    let response = registry
        .send("GET", &format!("/v2/alpine/blobs/{digest}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "15");
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        "application/octet-stream"
    );
    assert_eq!(&body(response).await[..], b"0123456789abcde");

    // The session is gone once committed.
    let response = registry.send("GET", &location, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn head_blob() {
    let registry = TestRegistry::memory();
    let digest = registry.push_blob("alpine", b"layer contents").await;

    let response = registry
        .send("HEAD", &format!("/v2/alpine/blobs/{digest}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "14");
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn blobs_are_shared_between_repositories() {
    let registry = TestRegistry::memory();
    let digest = registry.push_blob("alpine", b"shared layer").await;

    let response = registry
        .send("GET", &format!("/v2/debian/blobs/{digest}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body(response).await[..], b"shared layer");
}

#[tokio::test]
async fn pushing_a_blob_twice() {
    let registry = TestRegistry::memory();
    let first = registry.push_blob("alpine", b"same bytes").await;
    let second = registry.push_blob("alpine", b"same bytes").await;
    assert_eq!(first, second);

    let response = registry
        .send("GET", &format!("/v2/alpine/blobs/{first}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), first.to_string());
}

#[tokio::test]
async fn mismatched_digest_is_rejected() {
    let registry = TestRegistry::memory();
    let location = registry.start_upload("alpine").await;

    let response = registry.send("PATCH", &location, "actual bytes").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let claimed = Digest::of(b"claimed bytes");
    let response = registry
        .send("PUT", &format!("{location}?digest={claimed}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    for digest in [claimed, Digest::of(b"actual bytes")] {
        let response = registry
            .send("GET", &format!("/v2/alpine/blobs/{digest}"), Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = registry.send("GET", &location, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_blob() {
    let registry = TestRegistry::memory();
    let digest = Digest::of(b"never pushed");

    for method in ["GET", "HEAD"] {
        let response = registry
            .send(method, &format!("/v2/alpine/blobs/{digest}"), Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body(response).await.is_empty());
    }
}

#[tokio::test]
async fn unparseable_blob_digests_are_not_found() {
    let registry = TestRegistry::memory();
    let long = format!("sha512:{}", "ab".repeat(64));

    for digest in ["sha256:nothex", long.as_str(), "plain"] {
        let uri = format!("/v2/alpine/blobs/{digest}");
        for method in ["GET", "HEAD"] {
            let response = registry.send(method, &uri, Body::empty()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {digest}");
            assert!(body(response).await.is_empty());
        }
    }
}

#[tokio::test]
async fn bad_commit_digest_abandons_the_upload() {
    let registry = TestRegistry::memory();

    for query in ["?digest=md5:abc", ""] {
        let location = registry.start_upload("alpine").await;
        let response = registry.send("PATCH", &location, "data").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(registry.has_staged_upload(&location));

        let response = registry
            .send("PUT", &format!("{location}{query}"), Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{query:?}");

        let response = registry.send("GET", &location, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!registry.has_staged_upload(&location));
    }

    let response = registry
        .send("GET", &format!("/v2/alpine/blobs/{}", Digest::of(b"data")), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_upload_session() {
    let registry = TestRegistry::memory();
    let location = "/v2/alpine/blobs/uploads/6f1c1a8e-3f3b-4a59-9a0e-1f6d2b1c0e11";

    let response = registry.send("GET", location, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = registry.send("PATCH", location, "data").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let digest = Digest::of(b"data");
    let response = registry
        .send("PUT", &format!("{location}?digest={digest}"), "data")
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn manifest_round_trip() {
    let registry = TestRegistry::memory();
    let manifest = br#"{"schemaVersion":2}"#;
    let digest = Digest::of(manifest);

    let response = registry
        .send("PUT", "/v2/app/manifests/latest", &manifest[..])
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, header::LOCATION),
        "/v2/app/manifests/latest"
    );
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());

    let response = registry
        .send("HEAD", "/v2/app/manifests/latest", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "19");
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());

    let response = registry
        .send("GET", "/v2/app/manifests/latest", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        MANIFEST_V2_MEDIA_TYPE
    );
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());
    assert_eq!(&body(response).await[..], manifest);
}

#[tokio::test]
async fn manifest_tags_are_overwritten() {
    let registry = TestRegistry::memory();

    for manifest in [&br#"{"schemaVersion":1}"#[..], &br#"{"schemaVersion":2}"#[..]] {
        let response = registry
            .send("PUT", "/v2/app/manifests/latest", manifest)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = registry
        .send("GET", "/v2/app/manifests/latest", Body::empty())
        .await;
    assert_eq!(&body(response).await[..], br#"{"schemaVersion":2}"#);
}

#[tokio::test]
async fn unknown_manifest() {
    let registry = TestRegistry::memory();

    let response = registry
        .send("GET", "/v2/app/manifests/missing", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        &body(response).await[..],
        br#"{"errors": [{"code": "MANIFEST_UNKNOWN", "message": "MANIFEST_UNKNOWN"}]}"#
    );

    let response = registry
        .send("HEAD", "/v2/app/manifests/missing", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_names_and_references() {
    let registry = TestRegistry::memory();

    let response = registry
        .send("POST", "/v2/../blobs/uploads/", Body::empty())
        .await;
    assert_ne!(response.status(), StatusCode::ACCEPTED);

    let response = registry
        .send("PUT", "/v2/app/manifests/..latest", "{}")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = registry
        .send("PUT", "/v2/app/manifests/a%2Fb", "{}")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn local_storage_backend() {
    let root = tempfile::tempdir().unwrap();
    let driver = LocalDriver::new(Utf8Path::from_path(root.path()).unwrap().to_owned());
    let registry = TestRegistry::new(driver.into());

    let digest = registry.push_blob("alpine", b"on disk").await;
    let stored = root
        .path()
        .join("ddocker")
        .join("blobs")
        .join(digest.to_string());
    assert_eq!(std::fs::read(stored).unwrap(), b"on disk");

    let response = registry
        .send("GET", &format!("/v2/alpine/blobs/{digest}"), Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "7");
    assert_eq!(&body(response).await[..], b"on disk");

    let response = registry
        .send("PUT", "/v2/app/manifests/v1", r#"{"schemaVersion":2}"#)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(root.path().join("ddocker/manifests/app/v1").is_file());

    // Served straight from the backend, the file itself stays in place.
    let response = registry
        .send("GET", "/v2/app/manifests/v1", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body(response).await[..], br#"{"schemaVersion":2}"#);
    assert!(root.path().join("ddocker/manifests/app/v1").is_file());
}

#[tokio::test]
async fn failed_blob_push_is_a_server_error() {
    let (registry, driver) = TestRegistry::flaky();
    driver.fail_uploads.store(true, Ordering::SeqCst);

    let location = registry.start_upload("alpine").await;
    let digest = Digest::of(b"layer");
    let response = registry
        .send("PUT", &format!("{location}?digest={digest}"), "layer")
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!registry.has_staged_upload(&location));

    driver.fail_uploads.store(false, Ordering::SeqCst);
    let uri = format!("/v2/alpine/blobs/{digest}");
    for method in ["HEAD", "GET"] {
        let response = registry.send(method, &uri, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method}");
    }
}

#[tokio::test]
async fn failed_reads_are_not_reported_missing() {
    let (registry, driver) = TestRegistry::flaky();
    let digest = registry.push_blob("alpine", b"layer").await;
    let response = registry
        .send("PUT", "/v2/app/manifests/latest", r#"{"schemaVersion":2}"#)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    driver.fail_downloads.store(true, Ordering::SeqCst);

    let uri = format!("/v2/alpine/blobs/{digest}");
    for method in ["HEAD", "GET"] {
        let response = registry.send(method, &uri, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{method}");

        let response = registry
            .send(method, "/v2/app/manifests/latest", Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{method}");
    }
}

#[tokio::test]
async fn failed_manifest_push_is_a_server_error() {
    let (registry, driver) = TestRegistry::flaky();
    driver.fail_uploads.store(true, Ordering::SeqCst);

    let response = registry
        .send("PUT", "/v2/app/manifests/latest", r#"{"schemaVersion":2}"#)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    driver.fail_uploads.store(false, Ordering::SeqCst);
    let response = registry
        .send("GET", "/v2/app/manifests/latest", Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
