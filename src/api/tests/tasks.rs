use super::*;

#[tokio::test]
async fn test_submit_returns_created_id() {
    let app = test_app(false, |_| {}).await;

    let (status, _, body) = app.submit(1, &url("abc")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 1);

    let (status, task) = app.get("/tasks/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["state"], "pending");
    assert_eq!(task["source"], url("abc"));
    assert_eq!(task["correlation"]["user_id"], 1);
    assert_eq!(task["correlation"]["message_id"], 0);
    assert_eq!(task["progress"], 0);
}

#[tokio::test]
async fn test_submit_keeps_message_id() {
    let app = test_app(false, |_| {}).await;
    let (status, _, body) = app
        .send(json_request(
            Method::POST,
            "/tasks",
            json!({"user_id": 4, "url": url("m"), "message_id": 991}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, task) = app.get(&format!("/tasks/{}", body["id"])).await;
    assert_eq!(task["correlation"]["message_id"], 991);
}

#[tokio::test]
async fn test_submit_invalid_source_is_bad_request() {
    let app = test_app(false, |_| {}).await;

    let (status, _, body) = app.submit(1, "https://example.com/watch?v=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_source");
    assert_eq!(body["error"]["details"]["source"], "https://example.com/watch?v=1");
}

#[tokio::test]
async fn test_submit_over_rate_limit_is_429() {
    let app = test_app(false, |c| c.rate_limit.max_requests = 2).await;

    for video in ["a", "b"] {
        let (status, _, _) = app.submit(9, &url(video)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, headers, body) = app.submit(9, &url("c")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(body["error"]["details"]["user_id"], 9);

    let retry_after = body["error"]["details"]["retry_after_seconds"].as_u64().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        headers["retry-after"].to_str().unwrap(),
        retry_after.to_string()
    );

    // Another user still gets through
    let (status, _, _) = app.submit(10, &url("c")).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_submit_after_shutdown_is_503() {
    let app = test_app(false, |_| {}).await;
    app.scheduler.shutdown().await.unwrap();

    let (status, _, body) = app.submit(1, &url("late")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "shutting_down");
}

#[tokio::test]
async fn test_submit_without_user_is_rejected() {
    let app = test_app(false, |_| {}).await;
    let response = app
        .router()
        .oneshot(json_request(Method::POST, "/tasks", json!({"url": url("x")})))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert_eq!(app.scheduler.queue_stats().await.pending, 0);
}

#[tokio::test]
async fn test_get_unknown_task_is_404() {
    let app = test_app(false, |_| {}).await;

    let (status, body) = app.get("/tasks/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["details"]["task_id"], 77);
}

#[tokio::test]
async fn test_delete_pending_task() {
    let app = test_app(false, |_| {}).await;
    app.submit(1, &url("gone")).await;

    let (status, _, body) = app.send(empty(Method::DELETE, "/tasks/1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (_, task) = app.get("/tasks/1").await;
    assert_eq!(task["state"], "cancelled");
    assert_eq!(task["cancel_requested"], true);
}

#[tokio::test]
async fn test_delete_unknown_task_is_404() {
    let app = test_app(false, |_| {}).await;
    let (status, _, body) = app.send(empty(Method::DELETE, "/tasks/5")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_completed_task_is_served_from_history() {
    let app = test_app(true, |_| {}).await;
    let mut events = app.scheduler.subscribe();

    let (_, _, body) = app.submit(3, &url("done")).await;
    let id = body["id"].as_u64().unwrap();

    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await.unwrap() {
                Event::Delivered { id: d } | Event::DeliveryFailed { id: d, .. } if d.0 == id => {
                    break;
                }
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    let (status, task) = app.get(&format!("/tasks/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["state"], "completed");
    assert_eq!(task["progress"], 100);
    assert_eq!(task["metadata"]["title"], "done");

    // Finished tasks can no longer be cancelled
    let (status, _, _) = app
        .send(empty(Method::DELETE, &format!("/tasks/{}", id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
