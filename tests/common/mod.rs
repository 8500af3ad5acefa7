#![allow(dead_code)]

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use health_telemetry::{monitor_route, AuthStrategies, BasicAuth, Fault, HealthOptions, HealthPlugin};
use std::sync::Arc;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Host application with the plugin attached.
///
/// `/long` signals `entered` once its handler runs and answers only after
/// `release` is notified.
pub struct TestApp {
    pub router: Router,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

pub fn strategies() -> AuthStrategies {
    AuthStrategies::new()
        .with("bob", BasicAuth::new("bob").with_user("bob", "pass"))
        .with("alice", BasicAuth::new("alice").with_user("alice", "password"))
}

pub fn host_routes(entered: Arc<Notify>, release: Arc<Notify>) -> Router {
    Router::new()
        .route("/unmonitored", get(|| async { "OK" }).layer(monitor_route(false)))
        .route("/monitored", get(|| async { "OK" }).layer(monitor_route(true)))
        .route("/", get(|| async { "OK" }).post(|| async { (StatusCode::CREATED, "OK") }))
        .route("/badRequest", post(|| async { Fault::bad_request("this is bad") }))
        .route("/forbidden", get(|| async { Fault::forbidden("try again") }))
        .route(
            "/long",
            get(move || {
                let entered = entered.clone();
                let release = release.clone();
                async move {
                    entered.notify_one();
                    release.notified().await;
                    "OK"
                }
            }),
        )
}

pub fn with_plugin(plugin: HealthPlugin) -> TestApp {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let router = plugin
        .auth_strategies(strategies())
        .register(host_routes(entered.clone(), release.clone()))
        .expect("plugin registration");
    TestApp {
        router,
        entered,
        release,
    }
}

pub fn with_options(options: HealthOptions) -> TestApp {
    with_plugin(HealthPlugin::new(options))
}

pub fn basic(user: &str, password: &str) -> String {
    format!("basic {}", STANDARD.encode(format!("{user}:{password}")))
}

pub struct Reply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub text: String,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.text).expect("JSON body")
    }
}

pub async fn send(router: &Router, method: Method, uri: &str, authorization: Option<&str>) -> Reply {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        request = request.header(header::AUTHORIZATION, value);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    Reply {
        status,
        content_type,
        text: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

pub async fn get_path(router: &Router, uri: &str) -> Reply {
    send(router, Method::GET, uri, None).await
}

/// Whether `text` holds a sample of `name` carrying every label in `labels`,
/// whatever the label order.
pub fn has_sample(text: &str, name: &str, labels: &[(&str, &str)]) -> bool {
    let prefix = format!("{name}{{");
    text.lines().filter(|line| line.starts_with(&prefix)).any(|line| {
        labels
            .iter()
            .all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")))
    })
}
