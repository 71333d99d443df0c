use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Installs the global recorder and adds `/metrics` plus the HTTP middleware.
/// Should be called last, once every other route is on the router.
pub fn setup_metrics_routes(router: Router, buckets: &[f64]) -> Result<Router, BuildError> {
    let handle = setup_metrics_recorder(buckets)?;
    Ok(with_metrics_endpoint(router, handle))
}

/// Installs a Prometheus recorder as the process-wide `metrics` recorder.
/// Every histogram shares `buckets`. Fails if a recorder is already installed.
pub fn setup_metrics_recorder(buckets: &[f64]) -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(buckets)?
        .install_recorder()
}

pub fn with_metrics_endpoint(router: Router, handle: PrometheusHandle) -> Router {
    router
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .layer(axum::middleware::from_fn(track_metrics))
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
