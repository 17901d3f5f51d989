mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{config, create_root_logger_for_stdout};
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;
use tower::ServiceExt;

async fn router(bootstrap: bool) -> Result<Router, Box<dyn Error>> {
    let node = kvraft::try_create_node(config("n1", 7000, bootstrap)).await?;
    let server = kvraft::HttpServer::new(create_root_logger_for_stdout("n1"), Arc::new(node));

    Ok(server.router())
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<&str>) -> Result<(StatusCode, Value), Box<dyn Error>> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))?;

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;

    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn put_get_delete() -> Result<(), Box<dyn Error>> {
    let router = router(true).await?;

    let (status, body) = send(&router, "PUT", "/kv/greeting", Some(r#"{"value":"hello"}"#)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, body) = send(&router, "GET", "/kv/greeting", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "key": "greeting", "value": "hello" }));

    let (status, _) = send(&router, "DELETE", "/kv/greeting", None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "GET", "/kv/greeting", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    Ok(())
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() -> Result<(), Box<dyn Error>> {
    let router = router(true).await?;

    let (status, body) = send(&router, "PUT", "/kv/k", Some("{not json")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid request" }));

    let (status, _) = send(&router, "POST", "/join", Some(r#""n2""#)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn status_reports_leader_and_state() -> Result<(), Box<dyn Error>> {
    let leader = router(true).await?;
    let (status, body) = send(&leader, "GET", "/status", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "leader": "127.0.0.1:7000", "state": "Leader" }));

    let follower = router(false).await?;
    let (_, body) = send(&follower, "GET", "/status", None).await?;
    assert_eq!(body, json!({ "leader": "", "state": "Follower" }));

    Ok(())
}

#[tokio::test]
async fn writes_to_follower_fail_with_error_body() -> Result<(), Box<dyn Error>> {
    let router = router(false).await?;

    let (status, body) = send(&router, "PUT", "/kv/k", Some(r#"{"value":"v"}"#)).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let (status, _) = send(&router, "DELETE", "/kv/k", None).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    Ok(())
}

#[tokio::test]
async fn join_twice_succeeds() -> Result<(), Box<dyn Error>> {
    let router = router(true).await?;
    let join = r#"{"node_id":"n2","addr":"127.0.0.1:7001"}"#;

    let (status, body) = send(&router, "POST", "/join", Some(join)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, _) = send(&router, "POST", "/join", Some(join)).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn serves_over_tcp_until_shutdown() -> Result<(), Box<dyn Error>> {
    let node = Arc::new(kvraft::try_create_node(config("n1", 7000, true)).await?);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;

    let (shutdown_handle, shutdown_signal) = kvraft::shutdown_signal();
    let server = kvraft::HttpServer::new(create_root_logger_for_stdout("n1"), node.clone());
    let server_task = tokio::spawn(server.run(listener, shutdown_signal));

    let client = reqwest::Client::new();
    let response = client
        .put(format!("http://{}/kv/k", address))
        .json(&json!({ "value": "v" }))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: Value = client.get(format!("http://{}/kv/k", address)).send().await?.json().await?;
    assert_eq!(body, json!({ "key": "k", "value": "v" }));

    drop(client);
    shutdown_handle.shutdown();
    server_task.await??;
    node.shutdown().await;

    Ok(())
}
