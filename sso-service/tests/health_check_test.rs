//! Operational HTTP surface.

mod common;

use common::TestApp;
use sso_service::services::metrics;

#[tokio::test]
async fn health_check_returns_200() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    app.sso.login().await;

    let response = app
        .client()
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "sso-service-test");
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["registry"]["tickets"], 1);
    assert_eq!(body["checks"]["store"], "up");
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");

    let response = app
        .client()
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("Failed to read body");
    if metrics::METRICS_HANDLE.get().is_none() {
        assert!(body.contains("not initialized"));
    }
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");

    let response = app
        .client()
        .get(format!("{}/health", app.address))
        .header("x-request-id", "test-request-42")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "test-request-42"
    );
}
