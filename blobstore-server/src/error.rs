//! Error types for the blobstore API layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use blobstore_coordinator::CoordinatorError;
use thiserror::Error;

/// Error type for API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A definitive failure reason from the coordinator.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// A request the ingress could not interpret.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Coordinator(error) => match error {
                CoordinatorError::BlobDoesNotExist => StatusCode::NOT_FOUND,
                CoordinatorError::BlobDeleted | CoordinatorError::BlobExpired => StatusCode::GONE,
                CoordinatorError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                CoordinatorError::OperationTimedOut => StatusCode::GATEWAY_TIMEOUT,
                CoordinatorError::UnexpectedInternalError(_) => {
                    // These indicate protocol violations and deserve investigation.
                    tracing::error!(
                        error = error as &dyn std::error::Error,
                        "coordinator error handling request"
                    );
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(msg) => {
                tracing::debug!("bad request: {}", msg);
                StatusCode::BAD_REQUEST
            }
        };

        status.into_response()
    }
}
