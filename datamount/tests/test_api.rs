mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::Fixture;
use datamount::api::create_router;
use datamount::utils::state::AppState;

fn router(fx: &Fixture) -> Router {
    let state = AppState {
        service: fx.service.clone(),
        config: Arc::new(fx.service.config().clone()),
    };
    create_router(Arc::new(state))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn mount_body(fx: &Fixture, path: &str, behavior: &str) -> Value {
    serde_json::to_value(fx.request(path, behavior)).unwrap()
}

#[tokio::test]
async fn test_mount_list_unmount_over_http() {
    let fx = Fixture::new(true);
    let app = router(&fx);

    let (status, _) = send(&app, "POST", "/", Some(mount_body(&fx, "team/data1", "run"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, listed) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["team/data1"]["kind"], "generic-remote");
    assert_eq!(listed["team/data1"]["options"]["config"]["vendor"], "nextcloud");

    let (status, err) = send(&app, "POST", "/", Some(mount_body(&fx, "team/data1", "run"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "ALREADY_MOUNTED");

    let (status, _) = send(&app, "DELETE", "/team/data1?force=false", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, listed) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!({}));

    let (status, err) = send(&app, "DELETE", "/team/data1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["detail"]["path"], "team/data1");
}

#[tokio::test]
async fn test_errors_are_reported_as_json() {
    let fx = Fixture::new(true);
    let app = router(&fx);

    let (status, err) = send(&app, "POST", "/", Some(json!({ "path": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "VALIDATION_FAILED");

    let body = json!({ "path": "x", "kind": "ftp" });
    let (status, err) = send(&app, "POST", "/", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "UNKNOWN_BACKEND");

    let (status, err) = send(&app, "POST", "/", Some(mount_body(&fx, "x", "crash"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "LAUNCH_FAILED");
    assert!(err["detail"]["error"].as_str().unwrap().contains("bad credentials"));

    let (status, err) = send(&app, "POST", "/", Some(mount_body(&fx, "x", "unreachable"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "BACKEND_UNREACHABLE");
    assert!(err["detail"]["config"].as_str().unwrap().contains("vendor = nextcloud"));

    assert!(fx.service.registry().is_empty().await);
}

#[tokio::test]
async fn test_failed_unmount_is_reported_and_forced_one_succeeds() {
    let fx = Fixture::new(false);
    let app = router(&fx);

    let (status, _) = send(&app, "POST", "/", Some(mount_body(&fx, "data1", "run"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, err) = send(&app, "DELETE", "/data1", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err["error"], "UNMOUNT_FAILED");
    assert!(fx.service.registry().contains("data1").await);

    let (status, _) = send(&app, "DELETE", "/data1?force=true", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(fx.service.registry().is_empty().await);
}
