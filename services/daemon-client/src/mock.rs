//! A storage daemon stand-in which keeps buckets as directories below a temp dir.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use http::StatusCode;
use http_body_util::BodyExt as _;
use hyperdriver::service::SharedService;
use parking_lot::Mutex;
use serde_json::json;

use crate::{DaemonClient, DaemonConfig};

const MOCK_TOKEN: &str = "daemon-token";

#[derive(Debug, Clone)]
pub(crate) struct RecordedAdd {
    pub(crate) target: String,
    pub(crate) source: Utf8PathBuf,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashSet<String>,
    create_calls: usize,
    fail_adds: bool,
    added: Vec<RecordedAdd>,
    last_authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockDaemon {
    root: Arc<tempfile::TempDir>,
    state: Arc<Mutex<State>>,
}

impl MockDaemon {
    pub(crate) fn new() -> Self {
        let daemon = MockDaemon {
            root: Arc::new(tempfile::tempdir().unwrap()),
            state: Default::default(),
        };
        std::fs::create_dir_all(daemon.scratch()).unwrap();
        daemon
    }

    fn root(&self) -> &Utf8Path {
        Utf8Path::from_path(self.root.path()).unwrap()
    }

    /// Where clients stage their uploads.
    pub(crate) fn scratch(&self) -> Utf8PathBuf {
        self.root().join("scratch")
    }

    pub(crate) fn client(&self) -> DaemonClient {
        self.client_with_token(MOCK_TOKEN)
    }

    pub(crate) fn client_with_token(&self, token: &'static str) -> DaemonClient {
        let config = DaemonConfig {
            endpoint: "http://daemon.test:9998".parse().unwrap(),
            token: token.into(),
            scratch: Some(self.scratch()),
        };
        DaemonClient::from_client(SharedService::new(self.clone()), config)
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    pub(crate) fn fail_adds(&self) {
        self.state.lock().fail_adds = true;
    }

    pub(crate) fn added(&self) -> Vec<RecordedAdd> {
        self.state.lock().added.clone()
    }

    pub(crate) fn last_authorization(&self) -> Option<String> {
        self.state.lock().last_authorization.clone()
    }

    fn stored(&self, bucket: &str, path: &str) -> Utf8PathBuf {
        self.root()
            .join("buckets")
            .join(bucket)
            .join(path.trim_start_matches('/'))
    }

    async fn handle(self, req: http::Request<hyperdriver::Body>) -> http::Response<hyperdriver::Body> {
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        self.state.lock().last_authorization = authorization.clone();

        let expected = format!("AppToken {MOCK_TOKEN}");
        if authorization.as_deref() != Some(expected.as_str()) {
            return error(StatusCode::UNAUTHORIZED, "unauthenticated");
        }

        let method = req.uri().path().trim_start_matches('/').to_owned();
        let body = req.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        match method.as_str() {
            "space.SpaceApi/CreateBucket" => {
                let slug = body["slug"].as_str().unwrap().to_owned();
                let mut state = self.state.lock();
                state.create_calls += 1;
                if !state.buckets.insert(slug.clone()) {
                    return error(StatusCode::CONFLICT, "bucket already exists");
                }
                respond(json!({ "bucket": { "key": slug, "path": format!("/{slug}") } }).to_string())
            }
            "space.SpaceApi/AddItems" => {
                let bucket = body["bucket"].as_str().unwrap();
                let target = body["targetPath"].as_str().unwrap().to_owned();
                let source = Utf8PathBuf::from(body["sourcePaths"][0].as_str().unwrap());

                if self.state.lock().fail_adds {
                    let event = json!({
                        "result": { "sourcePath": source.as_str(), "error": "disk full" },
                    });
                    return respond(format!("{event}\n"));
                }

                let dest = self
                    .stored(bucket, &target)
                    .join(source.file_name().unwrap());
                tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
                tokio::fs::copy(&source, &dest).await.unwrap();

                self.state.lock().added.push(RecordedAdd {
                    target: target.clone(),
                    source: source.clone(),
                });
                let progress = json!({ "totalFiles": 1, "completedFiles": 0 });
                let done = json!({
                    "result": { "sourcePath": source.as_str(), "bucketPath": dest.as_str() },
                    "totalFiles": 1,
                    "completedFiles": 1,
                });
                respond(format!("{progress}\n{done}\n"))
            }
            "space.SpaceApi/OpenFile" => {
                let location = self.stored(
                    body["bucket"].as_str().unwrap(),
                    body["path"].as_str().unwrap(),
                );
                if location.exists() {
                    respond(json!({ "location": location.as_str() }).to_string())
                } else {
                    error(StatusCode::NOT_FOUND, "no such file")
                }
            }
            _ => error(StatusCode::NOT_FOUND, "no such method"),
        }
    }
}

fn respond(body: String) -> http::Response<hyperdriver::Body> {
    http::Response::builder()
        .status(StatusCode::OK)
        .body(hyperdriver::Body::from(Bytes::from(body)))
        .unwrap()
}

fn error(status: StatusCode, message: &str) -> http::Response<hyperdriver::Body> {
    http::Response::builder()
        .status(status)
        .body(hyperdriver::Body::from(Bytes::from(
            json!({ "message": message }).to_string(),
        )))
        .unwrap()
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockDaemon {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
