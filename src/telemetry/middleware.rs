//! axum integration of the telemetry recorder
//!
//! [`track_requests`] is installed with `Router::layer`, which wraps every route
//! and the fallback, so it sees the matched route template. Routes tag their
//! responses with a [`RouteMonitoring`] through [`monitor_route`].

use super::fault::FaultStatus;
use super::policy::RouteMonitoring;
use super::recorder::{CompletedRequest, RequestOutcome, RequestTimings, TelemetryRecorder};
use axum::body::{Body, Bytes};
use axum::extract::{MatchedPath, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use futures::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Layer tagging a route's responses with its monitoring flag.
///
/// ```ignore
/// Router::new().route("/internal", get(handler).layer(monitor_route(false)))
/// ```
pub fn monitor_route(monitored: bool) -> MonitorRouteLayer {
    MonitorRouteLayer {
        monitoring: RouteMonitoring::from(monitored),
    }
}

/// See [`monitor_route`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorRouteLayer {
    monitoring: RouteMonitoring,
}

impl<S> Layer<S> for MonitorRouteLayer {
    type Service = MonitorRoute<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MonitorRoute {
            inner,
            monitoring: self.monitoring,
        }
    }
}

/// Service produced by [`MonitorRouteLayer`].
#[derive(Debug, Clone)]
pub struct MonitorRoute<S> {
    inner: S,
    monitoring: RouteMonitoring,
}

impl<S, B> Service<axum::http::Request<B>> for MonitorRoute<S>
where
    S: Service<axum::http::Request<B>, Response = Response>,
    S::Future: Send + 'static,
    S::Error: 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<B>) -> Self::Future {
        let monitoring = self.monitoring;
        let response = self.inner.call(request);
        Box::pin(async move {
            let mut response = response.await?;
            response.extensions_mut().insert(monitoring);
            Ok(response)
        })
    }
}

/// Middleware feeding [`TelemetryRecorder`] with request start and completion.
///
/// Completion fires once the response body has been fully produced, or when the
/// body is dropped early, or when the request itself is dropped before the
/// handler answered.
pub async fn track_requests(
    State(recorder): State<Arc<TelemetryRecorder>>,
    request: Request,
    next: Next,
) -> Response {
    let route_path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned());
    let mut tracker = RequestTracker::start(
        recorder,
        request.method().clone(),
        route_path,
        request.uri().path().to_owned(),
    );

    let response = next.run(request).await;
    tracker.responded(&response);

    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(TrackedBody::new(body, tracker)))
}

struct ResponseInfo {
    monitoring: RouteMonitoring,
    outcome: RequestOutcome,
    responded: Instant,
}

/// Pairs every `on_request_start` with exactly one `on_request_complete`.
struct RequestTracker {
    recorder: Arc<TelemetryRecorder>,
    method: Method,
    route_path: Option<String>,
    path: String,
    received: Instant,
    response: Option<ResponseInfo>,
    finished: bool,
}

impl RequestTracker {
    fn start(recorder: Arc<TelemetryRecorder>, method: Method, route_path: Option<String>, path: String) -> Self {
        let received = Instant::now();
        recorder.on_request_start(&method);
        Self {
            recorder,
            method,
            route_path,
            path,
            received,
            response: None,
            finished: false,
        }
    }

    fn responded(&mut self, response: &Response) {
        let extensions = response.extensions();
        let outcome = match extensions.get::<FaultStatus>() {
            Some(fault) => RequestOutcome::Fault(fault.0),
            None => RequestOutcome::Response(response.status()),
        };
        self.response = Some(ResponseInfo {
            monitoring: extensions.get::<RouteMonitoring>().copied().unwrap_or_default(),
            outcome,
            responded: Instant::now(),
        });
    }

    fn finish(&mut self, completed: Option<Instant>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let info = self.response.take().unwrap_or_else(|| ResponseInfo {
            monitoring: RouteMonitoring::Unset,
            outcome: RequestOutcome::client_closed(),
            responded: Instant::now(),
        });
        let request = CompletedRequest {
            method: self.method.clone(),
            route_path: self.route_path.take(),
            path: std::mem::take(&mut self.path),
            monitoring: info.monitoring,
            outcome: info.outcome,
            timings: RequestTimings {
                received: self.received,
                responded: info.responded,
                completed,
            },
        };
        self.recorder.on_request_complete(&request);
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        self.finish(None);
    }
}

pin_project! {
    /// Response body reporting its own completion to the tracker.
    struct TrackedBody {
        #[pin]
        inner: Body,
        tracker: Option<RequestTracker>,
    }
}

impl TrackedBody {
    fn new(inner: Body, tracker: RequestTracker) -> Self {
        Self {
            inner,
            tracker: Some(tracker),
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let frame = ready!(this.inner.as_mut().poll_frame(cx));

        let done = match &frame {
            Some(Ok(_)) => this.inner.is_end_stream(),
            Some(Err(_)) | None => true,
        };
        if done {
            if let Some(mut tracker) = this.tracker.take() {
                tracker.finish(Some(Instant::now()));
            }
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
