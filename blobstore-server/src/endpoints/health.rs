use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing;

use crate::state::ServiceState;

pub fn router() -> Router<ServiceState> {
    Router::new().route("/health", routing::get(health))
}

/// Liveness probe; degrades once the coordinator refuses new operations.
async fn health(State(state): State<ServiceState>) -> StatusCode {
    if state.coordinator.is_closed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
