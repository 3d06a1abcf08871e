//! Tower middleware shared by all routes.

use std::any::Any;

use axum::RequestExt;
use axum::extract::{ConnectInfo, MatchedPath, Request};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::web::idle::SocketAddrConnectInfo;

/// The value for the `Server` HTTP header.
const SERVER: &str = concat!("blobstore/", env!("CARGO_PKG_VERSION"));

/// Create a `SetResponseHeaderLayer` that sets the `Server` header.
pub fn set_server_header() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(header::SERVER, HeaderValue::from_static(SERVER))
}

/// Create a tracing span for an HTTP request, recording the client address if available.
pub fn make_http_span(request: &Request) -> tracing::Span {
    let span = tracing::debug_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
        client_addr = tracing::field::Empty,
    );

    if let Some(ConnectInfo(SocketAddrConnectInfo(addr))) =
        request.extensions().get::<ConnectInfo<SocketAddrConnectInfo>>()
    {
        span.record("client_addr", tracing::field::display(addr.ip()));
    }

    span
}

/// A panic handler that logs the panic and turns it into a 500 response.
///
/// Use with the [`CatchPanicLayer`](tower_http::catch_panic::CatchPanicLayer) middleware.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "no error details".to_owned()
    };

    tracing::error!("panic in web handler: {detail}");

    (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response()
}

/// A middleware that counts requests and logs their timings as metrics.
///
/// Use this with [`from_fn`](axum::middleware::from_fn).
pub async fn emit_request_metrics(mut request: Request, next: Next) -> Response {
    let matched_path = request.extract_parts::<MatchedPath>().await;
    let route = matched_path.as_ref().map_or("unknown", |m| m.as_str());
    let method = request.method().clone();

    merni::counter!(
        "server.requests": 1,
        "route" => route,
        "method" => method.as_str()
    );

    let start = Instant::now();
    let response = next.run(request).await;

    merni::distribution!(
        "server.requests.duration"@s: start.elapsed(),
        "route" => route,
        "method" => method,
        "status" => response.status().as_u16()
    );

    response
}
