//! HTTP endpoint definitions.

mod blobs;
mod health;

use axum::Router;

use crate::state::ServiceState;

/// Builds the router over all endpoints.
pub fn routes() -> Router<ServiceState> {
    Router::new().merge(blobs::router()).merge(health::router())
}
