//! In-memory stand-in for the bucket service, used as the client transport in tests.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::StatusCode;
use http_body_util::BodyExt as _;
use hyperdriver::service::SharedService;
use parking_lot::Mutex;
use serde_json::json;

use crate::{BucketClient, BucketServiceConfig};

const MOCK_TOKEN: &str = "hub-token";

#[derive(Debug, Clone)]
pub(crate) struct RecordedCreate {
    pub(crate) authorization: Option<String>,
    pub(crate) body: serde_json::Value,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, String>,
    objects: HashMap<String, Bytes>,
    create_calls: usize,
    fail_next_create: bool,
    last_create: Option<RecordedCreate>,
    last_put_length: Option<u64>,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct MockBucketService {
    state: Arc<Mutex<State>>,
}

impl MockBucketService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn client(&self) -> BucketClient {
        self.build(MOCK_TOKEN, false)
    }

    pub(crate) fn client_with(&self, encrypted: bool) -> BucketClient {
        self.build(MOCK_TOKEN, encrypted)
    }

    pub(crate) fn client_with_token(&self, token: &'static str) -> BucketClient {
        self.build(token, false)
    }

    fn build(&self, token: &'static str, encrypted: bool) -> BucketClient {
        let config = BucketServiceConfig {
            endpoint: "http://hub.test".parse().unwrap(),
            token: token.into(),
            encrypted,
        };
        BucketClient::from_client(SharedService::new(self.clone()), config)
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    pub(crate) fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    pub(crate) fn last_create(&self) -> Option<RecordedCreate> {
        self.state.lock().last_create.clone()
    }

    /// `Content-Length` declared by the most recent object upload.
    pub(crate) fn last_put_length(&self) -> Option<u64> {
        self.state.lock().last_put_length
    }

    pub(crate) fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    async fn handle(self, req: http::Request<hyperdriver::Body>) -> http::Response<hyperdriver::Body> {
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let expected = format!("Bearer {MOCK_TOKEN}");
        if authorization.as_deref() != Some(expected.as_str()) {
            return error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "bad token");
        }

        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let length = req
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return error(StatusCode::BAD_REQUEST, "BAD_BODY", "truncated body"),
        };

        let segments: Vec<&str> = path.trim_start_matches('/').splitn(4, '/').collect();
        match (method, segments.as_slice()) {
            (http::Method::POST, ["buckets"]) => {
                let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

                // Give racing callers a chance to pile up behind the first request.
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;

                let mut state = self.state.lock();
                state.create_calls += 1;
                state.last_create = Some(RecordedCreate {
                    authorization,
                    body: body.clone(),
                });

                if std::mem::take(&mut state.fail_next_create) {
                    return error(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", "try again");
                }

                let name = body["name"].as_str().unwrap().to_owned();
                let key = state
                    .buckets
                    .entry(name.clone())
                    .or_insert_with(|| format!("key-{name}"))
                    .clone();
                respond(StatusCode::OK, json!({ "key": key, "name": name }).to_string())
            }
            (http::Method::PUT, ["buckets", key, "paths", object]) => {
                let mut state = self.state.lock();
                state.last_put_length = length;
                state.objects.insert(format!("{key}/{object}"), body);
                respond(StatusCode::OK, String::new())
            }
            (http::Method::GET, ["buckets", key, "paths", object]) => {
                let state = self.state.lock();
                match state.objects.get(&format!("{key}/{object}")) {
                    Some(data) => http::Response::builder()
                        .status(StatusCode::OK)
                        .body(hyperdriver::Body::from(data.clone()))
                        .unwrap(),
                    None => error(StatusCode::NOT_FOUND, "NOT_FOUND", "no such path"),
                }
            }
            _ => error(StatusCode::NOT_FOUND, "NOT_FOUND", "no such route"),
        }
    }
}

fn respond(status: StatusCode, body: String) -> http::Response<hyperdriver::Body> {
    http::Response::builder()
        .status(status)
        .version(http::Version::HTTP_11)
        .body(hyperdriver::Body::from(Bytes::from(body)))
        .unwrap()
}

fn error(status: StatusCode, code: &str, message: &str) -> http::Response<hyperdriver::Body> {
    respond(
        status,
        json!({ "code": code, "message": message }).to_string(),
    )
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockBucketService {
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
