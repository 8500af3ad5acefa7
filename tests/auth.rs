mod common;

use axum::http::{header, Method, StatusCode};
use axum::Router;
use common::{basic, send, with_options};
use health_telemetry::{AuthConfig, AuthSetting, Endpoint, Error, HealthOptions, HealthPlugin};
use serde_json::json;
use std::collections::HashMap;

async fn status(app: &common::TestApp, uri: &str, authorization: Option<&str>) -> StatusCode {
    send(&app.router, Method::GET, uri, authorization).await.status
}

#[tokio::test]
async fn test_no_auth_by_default() {
    let app = with_options(HealthOptions::default());

    let reply = send(&app.router, Method::GET, "/liveness", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"status": "OK"}));
}

#[tokio::test]
async fn test_single_strategy_for_all_endpoints() {
    let options = HealthOptions {
        auth: AuthConfig::Scalar(AuthSetting::Strategy("bob".to_string())),
        ..Default::default()
    };
    let app = with_options(options);
    let bob = basic("bob", "pass");
    let alice = basic("alice", "password");

    for route in ["/liveness", "/readiness", "/metrics"] {
        assert_eq!(status(&app, route, None).await, StatusCode::UNAUTHORIZED, "{route}");
        assert_eq!(status(&app, route, Some(&alice)).await, StatusCode::UNAUTHORIZED, "{route}");
        assert_eq!(status(&app, route, Some(&bob)).await, StatusCode::OK, "{route}");
    }

    // host routes stay open
    assert_eq!(status(&app, "/", None).await, StatusCode::OK);
}

#[tokio::test]
async fn test_rejection_carries_a_challenge() {
    let options = HealthOptions {
        auth: AuthConfig::Scalar(AuthSetting::Strategy("bob".to_string())),
        ..Default::default()
    };
    let app = with_options(options);

    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        axum::extract::Request::builder()
            .uri("/liveness")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Basic realm=\"bob\"");
}

#[tokio::test]
async fn test_distinct_strategy_per_endpoint() {
    let options = HealthOptions {
        auth: AuthConfig::PerEndpoint(HashMap::from([
            (Endpoint::Liveness, AuthSetting::Strategy("bob".to_string())),
            (Endpoint::Readiness, AuthSetting::Disabled),
            (Endpoint::Metrics, AuthSetting::Strategy("alice".to_string())),
        ])),
        ..Default::default()
    };
    let app = with_options(options);
    let bob = basic("bob", "pass");
    let alice = basic("alice", "password");

    assert_eq!(status(&app, "/liveness", None).await, StatusCode::UNAUTHORIZED);
    assert_eq!(status(&app, "/readiness", None).await, StatusCode::OK);
    assert_eq!(status(&app, "/metrics", None).await, StatusCode::UNAUTHORIZED);

    assert_eq!(status(&app, "/liveness", Some(&alice)).await, StatusCode::UNAUTHORIZED);
    assert_eq!(status(&app, "/readiness", Some(&alice)).await, StatusCode::OK);
    assert_eq!(status(&app, "/metrics", Some(&alice)).await, StatusCode::OK);

    assert_eq!(status(&app, "/liveness", Some(&bob)).await, StatusCode::OK);
    assert_eq!(status(&app, "/readiness", Some(&bob)).await, StatusCode::OK);
    assert_eq!(status(&app, "/metrics", Some(&bob)).await, StatusCode::UNAUTHORIZED);
}

#[test]
fn test_endpoint_missing_from_mapping_fails_registration() {
    let options: HealthOptions = serde_json::from_value(json!({
        "auth": {"metrics": "alice"}
    }))
    .unwrap();

    let result = HealthPlugin::new(options)
        .auth_strategies(common::strategies())
        .register(Router::<()>::new());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_mapping_may_leave_endpoints_open_explicitly() {
    let options: HealthOptions = serde_json::from_value(json!({
        "auth": {"liveness": false, "readiness": false, "metrics": "alice"}
    }))
    .unwrap();
    let app = with_options(options);

    assert_eq!(status(&app, "/liveness", None).await, StatusCode::OK);
    assert_eq!(status(&app, "/readiness", None).await, StatusCode::OK);
    assert_eq!(status(&app, "/metrics", None).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejected_requests_are_counted_when_probes_are_monitored() {
    let options = HealthOptions {
        monitor_probes: true,
        auth: AuthConfig::PerEndpoint(HashMap::from([
            (Endpoint::Liveness, AuthSetting::Strategy("bob".to_string())),
            (Endpoint::Readiness, AuthSetting::Disabled),
            (Endpoint::Metrics, AuthSetting::Disabled),
        ])),
        ..Default::default()
    };
    let app = with_options(options);

    assert_eq!(status(&app, "/liveness", None).await, StatusCode::UNAUTHORIZED);

    let text = send(&app.router, Method::GET, "/metrics", None).await.text;
    assert!(text.contains(r#"http_request_count{method="get",status_code="401",path="/liveness"} 1"#));
}
