use std::time::Instant;

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Method named by the `/{method}` route, if the path carries one.
fn rpc_method(path: &str) -> Option<&str> {
    let segment = path.trim_matches('/');
    (!segment.is_empty() && !segment.contains('/')).then_some(segment)
}

/// One summary line per HTTP exchange.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let verb = request.method().clone();
    let path = request.uri().path().to_string();
    let body_bytes = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();
    let rpc_method = rpc_method(&path).unwrap_or("-");

    info!(
        verb = %verb,
        rpc_method,
        body_bytes,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "rpc exchange"
    );

    if status.is_client_error() {
        warn!(verb = %verb, path = %path, status = status.as_u16(), "rpc exchange refused");
    }

    response
}
