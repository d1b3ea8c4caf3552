//! Router tests driven through `tower::ServiceExt::oneshot`.

use super::*;
use crate::scheduler::tests::{MockFetcher, RecordingDelivery, WAIT, test_config, url};
use crate::types::Event;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

mod tasks;

/// A scheduler behind a router, with its working directory kept alive
struct TestApp {
    scheduler: Scheduler,
    config: Arc<Config>,
    _temp_dir: TempDir,
}

/// Build a scheduler around the mock fetcher; `start` decides whether workers run
async fn test_app(start: bool, configure: impl FnOnce(&mut Config)) -> TestApp {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let scheduler = Scheduler::new(
        config.clone(),
        Arc::new(MockFetcher::new()),
        Arc::new(RecordingDelivery::default()),
    )
    .await
    .unwrap();
    if start {
        scheduler.start().await;
    }

    TestApp {
        scheduler,
        config: Arc::new(config),
        _temp_dir: temp_dir,
    }
}

impl TestApp {
    fn router(&self) -> Router {
        create_router(self.scheduler.clone(), self.config.clone())
    }

    /// Send one request and decode the JSON body (`Null` when empty)
    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, headers, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self.send(empty(Method::GET, uri)).await;
        (status, body)
    }

    async fn submit(&self, user_id: i64, source: &str) -> (StatusCode, HeaderMap, Value) {
        self.send(json_request(
            Method::POST,
            "/tasks",
            json!({"user_id": user_id, "url": source}),
        ))
        .await
    }
}

fn empty(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
